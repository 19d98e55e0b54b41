//! Specificity scales and cached per-string scores.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use ontoloom_core::{Result, SpecificityRepository, SpecificityScale};

use crate::upsert::{at_most_one, ensure_str, upsert, Field, Fields, UpsertTarget};

/// PostgreSQL implementation of [`SpecificityRepository`].
#[derive(Clone)]
pub struct PgSpecificityRepository {
    pool: PgPool,
    schema: String,
}

impl PgSpecificityRepository {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }
}

#[async_trait]
impl SpecificityRepository for PgSpecificityRepository {
    async fn register_scale(&self, scale: &SpecificityScale) -> Result<Uuid> {
        upsert(
            &self.pool,
            UpsertTarget {
                schema: &self.schema,
                table: "specificity_scales",
                key_sets: &[&["name"]],
            },
            Fields::new()
                .with("name", Field::Text(Some(scale.name.clone())))
                .with("prompt", Field::Text(Some(scale.prompt.clone())))
                .with("min_val", Field::Float(Some(scale.min_val)))
                .with("max_val", Field::Float(Some(scale.max_val))),
        )
        .await
    }

    async fn lookup(&self, scale_id: Uuid, text: &str) -> Result<Option<f64>> {
        let sql = format!(
            "SELECT ss.value FROM {s}.str_specificities ss \
             INNER JOIN {s}.strs s ON s.id = ss.str_id \
             WHERE ss.scale_id = $1 AND s.str = $2",
            s = self.schema
        );
        let values: Vec<f64> = sqlx::query_scalar(&sql)
            .bind(scale_id)
            .bind(text)
            .fetch_all(&self.pool)
            .await?;
        at_most_one(values, "str_specificities")
    }

    async fn record(&self, scale_id: Uuid, text: &str, value: f64) -> Result<()> {
        let str_id = ensure_str(&self.pool, &self.schema, text).await?;
        upsert(
            &self.pool,
            UpsertTarget {
                schema: &self.schema,
                table: "str_specificities",
                key_sets: &[&["scale_id", "str_id"]],
            },
            Fields::new()
                .with("scale_id", Field::Uuid(Some(scale_id)))
                .with("str_id", Field::Uuid(Some(str_id)))
                .with("value", Field::Float(Some(value))),
        )
        .await?;
        Ok(())
    }
}
