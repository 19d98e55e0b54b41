//! Per-source vector subqueries.
//!
//! Every enabled left source contributes a subquery yielding `obj_vec`
//! rows for the item being matched; every enabled right source contributes
//! one yielding `(code_id, code_vec)` rows for the target code set. The
//! ranking query unions each side and cross-joins the two unions.

use ontoloom_core::{defaults, LeftSource, MatchQuerySpec, QueryParam, Result, RightSource};

use crate::params::NamedParams;

/// Per-item parameter bound once for each left item.
pub const ROW_PARAM: &str = "obj_str_id";

/// One parametrized subquery over a single vector source.
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub source: &'static str,
    pub sql: String,
    pub params: NamedParams,
}

/// Left and right subqueries plus their merged parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SubquerySet {
    pub left: Vec<Subquery>,
    pub right: Vec<Subquery>,
    pub params: NamedParams,
}

/// Resolve the enabled sources of `spec` into subqueries.
///
/// Parameters of all subqueries are merged; conflicting values for one
/// name are a configuration error.
pub fn build(spec: &MatchQuerySpec, schema: &str) -> Result<SubquerySet> {
    spec.validate()?;
    let styles = StyleFilter::new(&spec.expansion_styles);
    let mut params = styles.params.clone();

    let left: Vec<Subquery> = spec
        .left_sources
        .iter()
        .map(|s| left_subquery(*s, spec, schema, &styles))
        .collect();
    let right: Vec<Subquery> = spec
        .right_sources
        .iter()
        .map(|s| right_subquery(*s, spec, schema, &styles))
        .collect();

    for sq in left.iter().chain(right.iter()) {
        params.merge(&sq.params)?;
    }
    Ok(SubquerySet { left, right, params })
}

/// `AND (sesp.style = :style_0 OR ...)` restriction on expansion sets.
#[derive(Debug, Clone, Default)]
struct StyleFilter {
    clause: String,
    params: NamedParams,
}

impl StyleFilter {
    fn new(styles: &[String]) -> Self {
        if styles.is_empty() {
            return Self::default();
        }
        let mut params = NamedParams::new();
        let parts: Vec<String> = styles
            .iter()
            .enumerate()
            .map(|(idx, style)| {
                let name = format!("style_{}", idx);
                params.set(name.clone(), QueryParam::Text(style.clone()));
                format!("sesp.style = :{}", name)
            })
            .collect();
        Self {
            clause: format!(" AND ({}) ", parts.join(" OR ")),
            params,
        }
    }
}

fn shared_params(spec: &MatchQuerySpec) -> NamedParams {
    NamedParams::new()
        .with("embedder_id", QueryParam::Uuid(spec.embedder_id))
        .with("match_to_code_set_name", QueryParam::Text(spec.target_code_set.clone()))
}

fn slot(spec: &MatchQuerySpec) -> &'static str {
    spec.vector_slot.column()
}

fn left_subquery(
    source: LeftSource,
    spec: &MatchQuerySpec,
    schema: &str,
    styles: &StyleFilter,
) -> Subquery {
    let obj = defaults::MATCH_LEFT_VEC;
    let params = NamedParams::new()
        .with(ROW_PARAM, QueryParam::Null)
        .with("embedder_id", QueryParam::Uuid(spec.embedder_id));
    match source {
        LeftSource::ObjMainStr => Subquery {
            source: "obj_main_str",
            sql: format!(
                "SELECT DISTINCT * FROM (\n\
                 SELECT sv.{slot} AS {obj}\n\
                 FROM {schema}.str_vectors sv\n\
                 WHERE sv.str_id = :{row} AND sv.embedder_id = :embedder_id\n\
                 LIMIT 1\n\
                 ) sq_obj_main_str",
                slot = slot(spec),
                row = ROW_PARAM,
            ),
            params,
        },
        LeftSource::ObjExpansionSummaryVec => Subquery {
            source: "obj_expansion_summary_vec",
            sql: format!(
                "SELECT sessv.orig_and_exp_mean AS {obj}\n\
                 FROM {schema}.str_expansion_sets ses\n\
                 INNER JOIN {schema}.str_expansion_set_summary_vectors sessv\n\
                     ON ses.id = sessv.str_expansion_set_id AND sessv.embedder_id = :embedder_id\n\
                 INNER JOIN {schema}.str_expansion_set_populators sesp\n\
                     ON ses.populator_id = sesp.id\n\
                 WHERE ses.orig_str_id = :{row}{styles}",
                row = ROW_PARAM,
                styles = styles.clause,
            ),
            params,
        },
    }
}

fn right_subquery(
    source: RightSource,
    spec: &MatchQuerySpec,
    schema: &str,
    styles: &StyleFilter,
) -> Subquery {
    let code = defaults::MATCH_RIGHT_VEC;
    let slot = slot(spec);
    let (name, sql) = match source {
        RightSource::CodeMainStr => (
            "code_main_str",
            format!(
                "SELECT DISTINCT ON (cs.code_id, sv.{slot}) cs.code_id, sv.{slot} AS {code}\n\
                 FROM {schema}.codes codes\n\
                 INNER JOIN {schema}.code_sets cs\n\
                     ON cs.set_name = :match_to_code_set_name AND codes.id = cs.code_id\n\
                 INNER JOIN {schema}.str_vectors sv\n\
                     ON sv.str_id = codes.main_str_id AND sv.embedder_id = :embedder_id"
            ),
        ),
        RightSource::CodeOtherStrs => (
            "code_other_strs",
            format!(
                "SELECT DISTINCT ON (cs.code_id, sv.{slot}) cstrs.code_id, sv.{slot} AS {code}\n\
                 FROM {schema}.code_strs cstrs\n\
                 INNER JOIN {schema}.code_sets cs\n\
                     ON cs.set_name = :match_to_code_set_name AND cstrs.code_id = cs.code_id\n\
                 INNER JOIN {schema}.str_vectors sv\n\
                     ON sv.str_id = cstrs.str_id AND sv.embedder_id = :embedder_id"
            ),
        ),
        RightSource::CodeSummaryVec => (
            "code_summary_vec",
            format!(
                "SELECT DISTINCT ON (csvs.code_id, csvs.mean) csvs.code_id, csvs.mean AS {code}\n\
                 FROM {schema}.code_summary_vectors csvs\n\
                 INNER JOIN {schema}.code_sets cs\n\
                     ON cs.set_name = :match_to_code_set_name AND csvs.code_id = cs.code_id\n\
                 WHERE csvs.embedder_id = :embedder_id"
            ),
        ),
        RightSource::CodeExpansionSummaryVec => (
            "code_expansion_summary_vec",
            format!(
                "SELECT DISTINCT ON (cs.code_id, sessv.orig_and_exp_mean) \
                 cs.code_id, sessv.orig_and_exp_mean AS {code}\n\
                 FROM {schema}.code_sets cs\n\
                 INNER JOIN {schema}.code_strs cstrs ON cs.code_id = cstrs.code_id\n\
                 INNER JOIN {schema}.str_expansion_sets ses ON cstrs.str_id = ses.orig_str_id\n\
                 INNER JOIN {schema}.str_expansion_set_summary_vectors sessv\n\
                     ON ses.id = sessv.str_expansion_set_id AND sessv.embedder_id = :embedder_id\n\
                 INNER JOIN {schema}.str_expansion_set_populators sesp\n\
                     ON ses.populator_id = sesp.id\n\
                 WHERE cs.set_name = :match_to_code_set_name{styles}",
                styles = styles.clause,
            ),
        ),
    };
    Subquery {
        source: name,
        sql,
        params: shared_params(spec),
    }
}
