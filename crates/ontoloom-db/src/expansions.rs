//! Expansion sets and the summary vectors built from them.
//!
//! Summary vectors are computed in the database with pgvector's `AVG` over
//! the mean slot, so the stored summary always reflects the rows that were
//! present when it was written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use ontoloom_core::{
    Error, ExpansionPopulatorRecord, ExpansionRepository, Result, SourceStr, StrSelection,
    StrSelectorType,
};

use crate::upsert::{ensure_str, upsert, upsert_row, Field, Fields, UpsertTarget};

/// Strings of the selection: main and other strings of codes, or the
/// objects a relation populator wrote.
fn select_sql(schema: &str, selector_type: StrSelectorType) -> String {
    let s = schema;
    match selector_type {
        StrSelectorType::Terminology => format!(
            "SELECT s.id AS str_id, s.str AS text FROM (\
                 SELECT c.main_str_id AS str_id FROM {s}.codes c WHERE c.terminology = $1 \
                 UNION \
                 SELECT cstrs.str_id FROM {s}.code_strs cstrs \
                 INNER JOIN {s}.codes c ON c.id = cstrs.code_id WHERE c.terminology = $1\
             ) picked \
             INNER JOIN {s}.strs s ON s.id = picked.str_id \
             ORDER BY text, str_id"
        ),
        StrSelectorType::CodeSet => format!(
            "SELECT s.id AS str_id, s.str AS text FROM (\
                 SELECT c.main_str_id AS str_id FROM {s}.code_sets cs \
                 INNER JOIN {s}.codes c ON c.id = cs.code_id WHERE cs.set_name = $1 \
                 UNION \
                 SELECT cstrs.str_id FROM {s}.code_sets cs \
                 INNER JOIN {s}.code_strs cstrs ON cstrs.code_id = cs.code_id \
                 WHERE cs.set_name = $1\
             ) picked \
             INNER JOIN {s}.strs s ON s.id = picked.str_id \
             ORDER BY text, str_id"
        ),
        StrSelectorType::Rel => format!(
            "SELECT DISTINCT s.id AS str_id, s.str AS text FROM {s}.rels r \
             INNER JOIN {s}.populators p ON p.id = r.populator_id \
             INNER JOIN {s}.strs s ON s.id = r.obj_str_id \
             WHERE p.name = $1 \
             ORDER BY text, str_id"
        ),
    }
}

/// Sets of populator `$1` whose members all have a mean vector from
/// embedder `$2`, and which have no summary yet.
fn summarize_sets_sql(schema: &str) -> String {
    let s = schema;
    format!(
        "INSERT INTO {s}.str_expansion_set_summary_vectors \
             (str_expansion_set_id, embedder_id, orig_and_exp_mean) \
         SELECT members.set_id, $2, AVG(sv.mean) FROM (\
             SELECT ses.id AS set_id, ses.orig_str_id AS str_id \
             FROM {s}.str_expansion_sets ses WHERE ses.populator_id = $1 \
             UNION \
             SELECT sess.str_expansion_set_id, sess.str_id FROM {s}.str_expansion_set_strs sess \
             INNER JOIN {s}.str_expansion_sets ses ON ses.id = sess.str_expansion_set_id \
             WHERE ses.populator_id = $1\
         ) members \
         LEFT JOIN {s}.str_vectors sv ON sv.str_id = members.str_id AND sv.embedder_id = $2 \
         WHERE EXISTS (SELECT 1 FROM {s}.str_expansion_set_strs filled \
                       WHERE filled.str_expansion_set_id = members.set_id) \
           AND NOT EXISTS (SELECT 1 FROM {s}.str_expansion_set_summary_vectors done \
                           WHERE done.str_expansion_set_id = members.set_id \
                             AND done.embedder_id = $2) \
         GROUP BY members.set_id \
         HAVING COUNT(*) = COUNT(sv.mean) \
         ON CONFLICT (str_expansion_set_id, embedder_id) DO NOTHING"
    )
}

/// Codes of terminology or code set `$1` with no summary from embedder `$2`.
fn summarize_codes_sql(schema: &str, selector_type: StrSelectorType) -> Result<String> {
    let s = schema;
    let (scope_join, scope_where) = match selector_type {
        StrSelectorType::Terminology => (String::new(), "WHERE c.terminology = $1"),
        StrSelectorType::CodeSet => (
            format!("INNER JOIN {s}.code_sets cs ON cs.code_id = c.id AND cs.set_name = $1 "),
            "",
        ),
        StrSelectorType::Rel => {
            return Err(Error::Config(
                "code summaries need a terminology or code_set selection".into(),
            ))
        }
    };
    Ok(format!(
        "INSERT INTO {s}.code_summary_vectors (code_id, embedder_id, mean) \
         SELECT members.code_id, $2, AVG(sv.mean) FROM (\
             SELECT c.id AS code_id, c.main_str_id AS str_id FROM {s}.codes c \
             {scope_join}{scope_where} \
             UNION \
             SELECT c.id, cstrs.str_id FROM {s}.codes c \
             {scope_join}INNER JOIN {s}.code_strs cstrs ON cstrs.code_id = c.id {scope_where}\
         ) members \
         INNER JOIN {s}.str_vectors sv \
             ON sv.str_id = members.str_id AND sv.embedder_id = $2 AND sv.mean IS NOT NULL \
         WHERE NOT EXISTS (SELECT 1 FROM {s}.code_summary_vectors done \
                           WHERE done.code_id = members.code_id AND done.embedder_id = $2) \
         GROUP BY members.code_id \
         ON CONFLICT (code_id, embedder_id) DO NOTHING"
    ))
}

/// PostgreSQL implementation of [`ExpansionRepository`].
#[derive(Clone)]
pub struct PgExpansionRepository {
    pool: PgPool,
    schema: String,
}

impl PgExpansionRepository {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }
}

#[async_trait]
impl ExpansionRepository for PgExpansionRepository {
    #[instrument(skip(self, record), fields(
        subsystem = "database",
        component = "expansions",
        op = "register_expansion_populator",
        populator = %record.name,
    ))]
    async fn register_expansion_populator(
        &self,
        record: &ExpansionPopulatorRecord,
    ) -> Result<Uuid> {
        let row = upsert_row(
            &self.pool,
            UpsertTarget {
                schema: &self.schema,
                table: "str_expansion_set_populators",
                key_sets: &[&["name"]],
            },
            Fields::new()
                .with("name", Field::Text(Some(record.name.clone())))
                .with("style", Field::Text(Some(record.style.clone())))
                .with("style_version", Field::Float(Some(record.style_version)))
                .with(
                    "selector_type",
                    Field::Text(Some(record.selection.selector_type.as_str().into())),
                )
                .with("selector_value", Field::Text(Some(record.selection.value.clone())))
                .with("prompt", Field::Text(Some(record.prompt.clone())))
                .with("model", Field::Text(Some(record.model.clone())))
                .with("notes", Field::Text(record.notes.clone())),
        )
        .await?;
        let id: Uuid = row.try_get("id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        debug!(%id, %created_at, "Expansion populator registered");
        Ok(id)
    }

    #[instrument(skip(self, selection), fields(
        subsystem = "database",
        component = "expansions",
        op = "select_strs",
        selector_type = selection.selector_type.as_str(),
    ))]
    async fn select_strs(&self, selection: &StrSelection) -> Result<Vec<SourceStr>> {
        let rows = sqlx::query(&select_sql(&self.schema, selection.selector_type))
            .bind(&selection.value)
            .fetch_all(&self.pool)
            .await?;
        let strs = rows
            .into_iter()
            .map(|row| -> Result<SourceStr> {
                Ok(SourceStr {
                    str_id: row.try_get("str_id")?,
                    text: row.try_get("text")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(result_count = strs.len(), "Selected strings");
        Ok(strs)
    }

    async fn ensure_set(&self, orig_str_id: Uuid, populator_id: Uuid) -> Result<Uuid> {
        upsert(
            &self.pool,
            UpsertTarget {
                schema: &self.schema,
                table: "str_expansion_sets",
                key_sets: &[&["orig_str_id", "populator_id"]],
            },
            Fields::new()
                .with("orig_str_id", Field::Uuid(Some(orig_str_id)))
                .with("populator_id", Field::Uuid(Some(populator_id))),
        )
        .await
    }

    async fn has_expansions(&self, set_id: Uuid) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {}.str_expansion_set_strs WHERE str_expansion_set_id = $1)",
            self.schema
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(set_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn add_expansion(&self, set_id: Uuid, text: &str, priority: u32) -> Result<Uuid> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("expansion string cannot be empty".into()));
        }
        let str_id = ensure_str(&self.pool, &self.schema, text).await?;
        // a repeated string keeps its first priority
        let sql = format!(
            "INSERT INTO {}.str_expansion_set_strs (str_expansion_set_id, str_id, priority) \
             VALUES ($1, $2, $3) ON CONFLICT (str_expansion_set_id, str_id) DO NOTHING",
            self.schema
        );
        sqlx::query(&sql)
            .bind(set_id)
            .bind(str_id)
            .bind(i64::from(priority))
            .execute(&self.pool)
            .await?;
        Ok(str_id)
    }

    #[instrument(skip(self), fields(
        subsystem = "database",
        component = "expansions",
        op = "summarize_sets",
    ))]
    async fn summarize_sets(&self, populator_id: Uuid, embedder_id: Uuid) -> Result<u64> {
        let written = sqlx::query(&summarize_sets_sql(&self.schema))
            .bind(populator_id)
            .bind(embedder_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        debug!(written, "Expansion set summaries written");
        Ok(written)
    }

    #[instrument(skip(self, selection), fields(
        subsystem = "database",
        component = "expansions",
        op = "summarize_codes",
        selector_type = selection.selector_type.as_str(),
    ))]
    async fn summarize_codes(&self, selection: &StrSelection, embedder_id: Uuid) -> Result<u64> {
        let sql = summarize_codes_sql(&self.schema, selection.selector_type)?;
        let written = sqlx::query(&sql)
            .bind(&selection.value)
            .bind(embedder_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        debug!(written, "Code summaries written");
        Ok(written)
    }
}
