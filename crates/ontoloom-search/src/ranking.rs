//! Ranking query assembly and result checks.
//!
//! The ranking query cross-joins the union of left subqueries with the
//! union of right subqueries, keeps each code's best (minimum) cosine
//! distance below the cutoff, numbers codes by ascending distance and keeps
//! ranks below the top-hit bound.

use std::collections::HashSet;

use uuid::Uuid;

use ontoloom_core::{defaults, BoundQuery, Error, QueryParam, RankedCandidate, Result};

use crate::params::{compile, NamedParams};
use crate::subqueries::{SubquerySet, ROW_PARAM};

const UNION: &str = "\n\nUNION\n\n";

/// Assemble the ranking SQL (with `:name` placeholders) for `subqueries`.
pub fn ranking_sql(subqueries: &SubquerySet, cutoff: f64) -> String {
    let left = join_union(subqueries.left.iter().map(|s| s.sql.as_str()));
    let right = join_union(subqueries.right.iter().map(|s| s.sql.as_str()));
    let l = defaults::MATCH_LEFT_VEC;
    let r = defaults::MATCH_RIGHT_VEC;

    format!(
        "SELECT code_id, ranking, dist FROM (\n\
         SELECT code_id, ROW_NUMBER() OVER (ORDER BY dist, code_id) AS ranking, dist FROM (\n\
         SELECT MIN({l} <=> {r}) AS dist, code_id\n\
         FROM (\n{left}\n) sq_left_vecs\n\
         CROSS JOIN (\n{right}\n) sq_right_vecs\n\
         WHERE {l} <=> {r} < {cutoff}\n\
         GROUP BY code_id\n\
         ) sq_rn\n\
         ) sq_outermost\n\
         WHERE ranking < :top_hit_count\n\
         ORDER BY ranking"
    )
}

/// Ranking SQL plus every parameter except the per-item one.
#[derive(Debug, Clone)]
pub struct RankingQuery {
    sql: String,
    params: NamedParams,
}

impl RankingQuery {
    pub fn prepare(subqueries: &SubquerySet, cutoff: f64, top_hit_count: i64) -> Result<Self> {
        let mut params = subqueries.params.clone();
        params.merge(&NamedParams::new().with("top_hit_count", QueryParam::Int(top_hit_count)))?;
        if params.get(ROW_PARAM).is_none() {
            return Err(Error::Config(format!(
                "ranking query has no per-item parameter '{}'",
                ROW_PARAM
            )));
        }
        Ok(Self {
            sql: ranking_sql(subqueries, cutoff),
            params,
        })
    }

    /// Compile the query for one left item.
    pub fn bind(&self, item: Uuid) -> Result<BoundQuery> {
        let mut params = self.params.clone();
        params.set(ROW_PARAM, QueryParam::Uuid(item));
        compile(&self.sql, &params)
    }
}

fn join_union<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.collect::<Vec<_>>().join(UNION)
}

/// Left items of a relation populator not yet matched by this matcher.
pub fn unmatched_sql(schema: &str) -> String {
    format!(
        "SELECT DISTINCT ON (rels.obj_str_id) rels.obj_str_id\n\
         FROM {schema}.rels rels\n\
         INNER JOIN {schema}.code_sets cs ON rels.subj_code_id = cs.code_id\n\
         WHERE rels.populator_id = :rel_populator_id\n\
             AND rels.rel = :rel\n\
             AND NOT EXISTS (\n\
                 SELECT 1 FROM {schema}.rel_code_matches rcm\n\
                 WHERE rcm.from_str_id = rels.obj_str_id\n\
                     AND rcm.matcher_id = :matcher_id\n\
             )\n\
         ORDER BY rels.obj_str_id"
    )
}

/// Verify a ranking result before it is persisted.
///
/// Ranks and codes must be unique, ranks must stay below `top_hit_count`
/// and distances below `cutoff`.
pub fn check_ranked(rows: &[RankedCandidate], top_hit_count: i64, cutoff: f64) -> Result<()> {
    let mut ranks = HashSet::new();
    let mut codes = HashSet::new();
    for row in rows {
        if row.rank < 1 || row.rank >= top_hit_count {
            return Err(Error::DataIntegrity(format!(
                "rank {} for code {} is outside 1..{}",
                row.rank, row.code_id, top_hit_count
            )));
        }
        if row.distance >= cutoff {
            return Err(Error::DataIntegrity(format!(
                "distance {} for code {} is not below the cutoff {}",
                row.distance, row.code_id, cutoff
            )));
        }
        if !ranks.insert(row.rank) {
            return Err(Error::DataIntegrity(format!("rank {} returned twice", row.rank)));
        }
        if !codes.insert(row.code_id) {
            return Err(Error::DataIntegrity(format!("code {} returned twice", row.code_id)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subqueries::{self, Subquery};
    use ontoloom_core::{LeftSource, MatchQuerySpec, RightSource, VectorSlot};

    fn set() -> SubquerySet {
        let sq = |sql: &str| Subquery {
            source: "t",
            sql: sql.to_string(),
            params: NamedParams::new(),
        };
        SubquerySet {
            left: vec![sq("SELECT L1"), sq("SELECT L2")],
            right: vec![sq("SELECT R1")],
            params: NamedParams::new(),
        }
    }

    #[test]
    fn test_ranking_sql_shape() {
        let sql = ranking_sql(&set(), 0.4);
        assert!(sql.contains("SELECT L1\n\nUNION\n\nSELECT L2"));
        assert!(sql.contains("CROSS JOIN (\nSELECT R1\n) sq_right_vecs"));
        assert!(sql.contains("MIN(obj_vec <=> code_vec) AS dist"));
        assert!(sql.contains("WHERE obj_vec <=> code_vec < 0.4"));
        assert!(sql.contains("WHERE ranking < :top_hit_count"));
        assert!(sql.contains("GROUP BY code_id"));
    }

    fn match_spec() -> MatchQuerySpec {
        MatchQuerySpec {
            from_populator_id: Uuid::nil(),
            from_relation: "may_be_caused_by".into(),
            left_sources: vec![LeftSource::ObjMainStr, LeftSource::ObjExpansionSummaryVec],
            right_sources: vec![RightSource::CodeMainStr, RightSource::CodeSummaryVec],
            vector_slot: VectorSlot::Mean,
            expansion_styles: vec!["synonyms".into()],
            target_code_set: "conditions".into(),
            embedder_id: Uuid::nil(),
            top_hit_count: 6,
        }
    }

    /// Position of the bind that follows `prefix` in compiled SQL.
    fn bind_after(sql: &str, prefix: &str) -> usize {
        let start = sql.find(prefix).unwrap() + prefix.len();
        sql[start..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .unwrap()
    }

    #[test]
    fn test_bound_query_filters_on_cutoff_and_top_hit_count() {
        let set = subqueries::build(&match_spec(), "ontoloom").unwrap();
        let item = Uuid::from_u128(42);
        let query = RankingQuery::prepare(&set, 0.4, 6).unwrap().bind(item).unwrap();

        // strictly below the cutoff: 0.4 itself is out
        assert!(query.sql.contains("WHERE obj_vec <=> code_vec < 0.4\n"));
        assert!(!query.sql.contains("<= 0.4"));

        let top = bind_after(&query.sql, "WHERE ranking < $");
        assert_eq!(query.params[top - 1], QueryParam::Int(6));
        let row = bind_after(&query.sql, "sv.str_id = $");
        assert_eq!(query.params[row - 1], QueryParam::Uuid(item));
        assert!(!query.sql.contains(":top_hit_count"));
    }

    #[test]
    fn test_cutoff_is_rendered_as_configured() {
        let set = subqueries::build(&match_spec(), "ontoloom").unwrap();
        let query = RankingQuery::prepare(&set, 0.25, 6).unwrap().bind(Uuid::nil()).unwrap();
        assert!(query.sql.contains("WHERE obj_vec <=> code_vec < 0.25\n"));
    }

    #[test]
    fn test_unmatched_sql_scopes_to_matcher() {
        let sql = unmatched_sql("ontoloom");
        assert!(sql.contains("FROM ontoloom.rels rels"));
        assert!(sql.contains("rcm.matcher_id = :matcher_id"));
    }

    fn row(rank: i64, distance: f64) -> RankedCandidate {
        RankedCandidate {
            code_id: Uuid::new_v4(),
            rank,
            distance,
        }
    }

    #[test]
    fn test_check_ranked_accepts_valid_rows() {
        check_ranked(&[row(1, 0.1), row(2, 0.2), row(3, 0.39)], 4, 0.4).unwrap();
    }

    #[test]
    fn test_check_ranked_rejects_duplicates_and_bounds() {
        assert!(check_ranked(&[row(1, 0.1), row(1, 0.2)], 4, 0.4).is_err());
        assert!(check_ranked(&[row(4, 0.1)], 4, 0.4).is_err());
        assert!(check_ranked(&[row(1, 0.5)], 4, 0.4).is_err());
        assert!(check_ranked(&[row(1, 0.4)], 4, 0.4).is_err());

        let dup = row(1, 0.1);
        let again = RankedCandidate { rank: 2, ..dup.clone() };
        assert!(matches!(
            check_ranked(&[dup, again], 4, 0.4),
            Err(Error::DataIntegrity(_))
        ));
    }
}
