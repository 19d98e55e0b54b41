//! Embedder registrations and per-string vectors.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use ontoloom_core::{Result, StringVectorRepository, Vector, VectorSlot};

use crate::upsert::{upsert, Field, Fields, UpsertTarget};

/// PostgreSQL implementation of [`StringVectorRepository`].
#[derive(Clone)]
pub struct PgStringVectorRepository {
    pool: PgPool,
    schema: String,
}

impl PgStringVectorRepository {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }
}

#[async_trait]
impl StringVectorRepository for PgStringVectorRepository {
    async fn register_embedder(&self, name: &str, model: &str, dimension: usize) -> Result<Uuid> {
        upsert(
            &self.pool,
            UpsertTarget {
                schema: &self.schema,
                table: "embedders",
                key_sets: &[&["name"]],
            },
            Fields::new()
                .with("name", Field::Text(Some(name.to_string())))
                .with("model", Field::Text(Some(model.to_string())))
                .with("dimension", Field::Int(Some(dimension as i64))),
        )
        .await
    }

    async fn has_vector(&self, str_id: Uuid, embedder_id: Uuid) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {}.str_vectors WHERE str_id = $1 AND embedder_id = $2)",
            self.schema
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(str_id)
            .bind(embedder_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn store_vector(
        &self,
        str_id: Uuid,
        embedder_id: Uuid,
        slot: VectorSlot,
        vector: Vector,
    ) -> Result<()> {
        let column = slot.column();
        let sql = format!(
            "INSERT INTO {schema}.str_vectors (str_id, embedder_id, {column}) VALUES ($1, $2, $3) \
             ON CONFLICT (str_id, embedder_id) DO UPDATE SET {column} = EXCLUDED.{column}",
            schema = self.schema,
        );
        sqlx::query(&sql)
            .bind(str_id)
            .bind(embedder_id)
            .bind(vector)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
