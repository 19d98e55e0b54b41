//! Populator registrations and relation triples.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use ontoloom_core::{
    Error, NewTriple, PopulatorRecord, RelationRepository, Result, SavedTriple, SelectorType,
};

use crate::upsert::{ensure_str, upsert, upsert_row, Field, Fields, UpsertTarget};

fn selector_name(selector_type: SelectorType) -> &'static str {
    match selector_type {
        SelectorType::Terminology => "terminology",
        SelectorType::CodeSet => "code_set",
        SelectorType::Query => "query",
    }
}

/// PostgreSQL implementation of [`RelationRepository`].
#[derive(Clone)]
pub struct PgRelationRepository {
    pool: PgPool,
    schema: String,
}

impl PgRelationRepository {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }
}

#[async_trait]
impl RelationRepository for PgRelationRepository {
    #[instrument(skip(self, populator), fields(
        subsystem = "database",
        component = "relations",
        op = "register_populator",
        populator = %populator.name,
    ))]
    async fn register_populator(&self, populator: &PopulatorRecord) -> Result<Uuid> {
        let relation_set: serde_json::Value = serde_json::from_str(&populator.relation_set_json)?;
        let row = upsert_row(
            &self.pool,
            UpsertTarget {
                schema: &self.schema,
                table: "populators",
                key_sets: &[&["name"]],
            },
            Fields::new()
                .with("name", Field::Text(Some(populator.name.clone())))
                .with(
                    "selector_type",
                    Field::Text(Some(selector_name(populator.selection.selector_type).into())),
                )
                .with(
                    "selector_value",
                    Field::Text(Some(populator.selection.value.clone())),
                )
                .with("relation_set", Field::Json(Some(relation_set)))
                .with("model", Field::Text(Some(populator.model.clone())))
                .with("notes", Field::Text(populator.notes.clone())),
        )
        .await?;
        let id: Uuid = row.try_get("id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        debug!(%id, %created_at, "Populator registered");
        Ok(id)
    }

    async fn has_relations(&self, subject_code_id: Uuid, populator_id: Uuid) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {}.rels WHERE subj_code_id = $1 AND populator_id = $2)",
            self.schema
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(subject_code_id)
            .bind(populator_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    #[instrument(skip(self, triple), fields(
        subsystem = "database",
        component = "relations",
        op = "save_triple",
        relation = %triple.relation,
        object = %triple.object,
    ))]
    async fn save_triple(&self, triple: &NewTriple) -> Result<SavedTriple> {
        if triple.object.trim().is_empty() {
            return Err(Error::InvalidInput("triple object cannot be empty".into()));
        }
        let object_str_id = ensure_str(&self.pool, &self.schema, &triple.object).await?;
        let triple_id = upsert(
            &self.pool,
            UpsertTarget {
                schema: &self.schema,
                table: "rels",
                key_sets: &[&["subj_code_id", "populator_id", "rel", "obj_str_id"]],
            },
            Fields::new()
                .with("subj_code_id", Field::Uuid(Some(triple.subject_code_id)))
                .with("populator_id", Field::Uuid(Some(triple.populator_id)))
                .with("rel", Field::Text(Some(triple.relation.clone())))
                .with("obj_str_id", Field::Uuid(Some(object_str_id)))
                .with("priority", Field::Int(Some(i64::from(triple.priority)))),
        )
        .await?;
        debug!(%triple_id, %object_str_id, priority = triple.priority, "Saved triple");
        Ok(SavedTriple {
            triple_id,
            object_str_id,
        })
    }
}
