//! Matcher registrations, bound-query execution and match rows.

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use ontoloom_core::{
    BoundQuery, Error, LeftSource, MatchRecord, MatchRepository, MatcherRecord, QueryParam,
    RankedCandidate, Result, RightSource,
};

use crate::upsert::{upsert, Field, Fields, UpsertTarget};

/// Every matcher column; a matcher is unique over all of them.
const MATCHER_KEY: &[&str] = &[
    "from_populator_id",
    "from_rel",
    "obj_main_str",
    "obj_expansion_summary_vec",
    "code_main_str",
    "code_other_strs",
    "code_summary_vec",
    "code_expansion_summary_vec",
    "vector_slot",
    "expansion_styles",
    "match_to_code_set_name",
    "embedder_id",
    "top_hit_count",
];

fn bind_params<'q>(sql: &'q str, params: &[QueryParam]) -> Query<'q, Postgres, PgArguments> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = match param {
            QueryParam::Text(v) => query.bind(v.clone()),
            QueryParam::Uuid(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            // Only the per-item uuid parameter starts out null.
            QueryParam::Null => query.bind(None::<Uuid>),
        };
    }
    query
}

fn matcher_fields(matcher: &MatcherRecord) -> Fields {
    let spec = &matcher.spec;
    let mut styles = spec.expansion_styles.clone();
    styles.sort();
    styles.dedup();

    Fields::new()
        .with("from_populator_id", Field::Uuid(Some(spec.from_populator_id)))
        .with("from_rel", Field::Text(Some(spec.from_relation.clone())))
        .with(
            "obj_main_str",
            Field::Bool(Some(spec.has_left(LeftSource::ObjMainStr))),
        )
        .with(
            "obj_expansion_summary_vec",
            Field::Bool(Some(spec.has_left(LeftSource::ObjExpansionSummaryVec))),
        )
        .with(
            "code_main_str",
            Field::Bool(Some(spec.has_right(RightSource::CodeMainStr))),
        )
        .with(
            "code_other_strs",
            Field::Bool(Some(spec.has_right(RightSource::CodeOtherStrs))),
        )
        .with(
            "code_summary_vec",
            Field::Bool(Some(spec.has_right(RightSource::CodeSummaryVec))),
        )
        .with(
            "code_expansion_summary_vec",
            Field::Bool(Some(spec.has_right(RightSource::CodeExpansionSummaryVec))),
        )
        .with(
            "vector_slot",
            Field::Text(Some(spec.vector_slot.column().to_string())),
        )
        .with("expansion_styles", Field::Text(Some(styles.join(","))))
        .with(
            "match_to_code_set_name",
            Field::Text(Some(spec.target_code_set.clone())),
        )
        .with("embedder_id", Field::Uuid(Some(matcher.embedder_id)))
        .with("top_hit_count", Field::Int(Some(spec.top_hit_count)))
}

/// PostgreSQL implementation of [`MatchRepository`].
#[derive(Clone)]
pub struct PgMatchRepository {
    pool: PgPool,
    schema: String,
}

impl PgMatchRepository {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    async fn fetch(&self, query: &BoundQuery) -> Result<Vec<PgRow>> {
        bind_params(&query.sql, &query.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::StructuralQuery(e.to_string()))
    }
}

#[async_trait]
impl MatchRepository for PgMatchRepository {
    #[instrument(skip(self, matcher), fields(
        subsystem = "database",
        component = "matches",
        op = "register_matcher",
    ))]
    async fn register_matcher(&self, matcher: &MatcherRecord) -> Result<Uuid> {
        upsert(
            &self.pool,
            UpsertTarget {
                schema: &self.schema,
                table: "matchers",
                key_sets: &[MATCHER_KEY],
            },
            matcher_fields(matcher),
        )
        .await
    }

    /// Streams the item ids inside one read transaction and drains the
    /// stream before committing. No write goes over that connection while
    /// it streams; match rows are saved afterwards on other connections.
    #[instrument(skip(self, query), fields(
        subsystem = "database",
        component = "matches",
        op = "fetch_unmatched",
    ))]
    async fn fetch_unmatched(&self, query: &BoundQuery) -> Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut ids = Vec::new();
        {
            let mut rows = bind_params(&query.sql, &query.params).fetch(&mut *tx);
            while let Some(row) = rows
                .try_next()
                .await
                .map_err(|e| Error::StructuralQuery(e.to_string()))?
            {
                ids.push(row.try_get::<Uuid, _>(0)?);
            }
        }
        tx.commit().await.map_err(Error::Database)?;
        debug!(result_count = ids.len(), "Fetched unmatched items");
        Ok(ids)
    }

    async fn rank(&self, query: &BoundQuery) -> Result<Vec<RankedCandidate>> {
        let rows = self.fetch(query).await?;
        rows.iter()
            .map(|row| -> Result<RankedCandidate> {
                Ok(RankedCandidate {
                    code_id: row.try_get("code_id")?,
                    rank: row.try_get("ranking")?,
                    distance: row.try_get("dist")?,
                })
            })
            .collect()
    }

    async fn save_match(&self, record: &MatchRecord) -> Result<()> {
        upsert(
            &self.pool,
            UpsertTarget {
                schema: &self.schema,
                table: "rel_code_matches",
                key_sets: &[
                    &["matcher_id", "from_str_id", "matched_code_id"],
                    &["matcher_id", "from_str_id", "ranking"],
                ],
            },
            Fields::new()
                .with("matcher_id", Field::Uuid(Some(record.matcher_id)))
                .with("from_str_id", Field::Uuid(Some(record.from_item_id)))
                .with("matched_code_id", Field::Uuid(Some(record.matched_code_id)))
                .with("ranking", Field::Int(Some(record.rank)))
                .with("distance", Field::Float(Some(record.distance))),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontoloom_core::{MatchQuerySpec, VectorSlot};

    fn record(styles: &[&str]) -> MatcherRecord {
        MatcherRecord {
            embedder_id: Uuid::nil(),
            spec: MatchQuerySpec {
                from_populator_id: Uuid::nil(),
                from_relation: "may_be_caused_by".into(),
                left_sources: vec![LeftSource::ObjMainStr],
                right_sources: vec![RightSource::CodeSummaryVec],
                vector_slot: VectorSlot::Cls,
                expansion_styles: styles.iter().map(|s| s.to_string()).collect(),
                target_code_set: "conditions".into(),
                embedder_id: Uuid::nil(),
                top_hit_count: 4,
            },
        }
    }

    #[test]
    fn test_matcher_fields_cover_the_unique_key() {
        let fields = matcher_fields(&record(&[]));
        let columns: Vec<&str> = fields.columns().collect();
        assert_eq!(columns, MATCHER_KEY);
        assert_eq!(fields.get("obj_main_str"), Some(&Field::Bool(Some(true))));
        assert_eq!(
            fields.get("obj_expansion_summary_vec"),
            Some(&Field::Bool(Some(false)))
        );
        assert_eq!(
            fields.get("vector_slot"),
            Some(&Field::Text(Some("cls".into())))
        );
    }

    #[test]
    fn test_style_order_does_not_change_matcher_identity() {
        assert_eq!(
            matcher_fields(&record(&["b", "a"])),
            matcher_fields(&record(&["a", "b", "a"]))
        );
    }
}
