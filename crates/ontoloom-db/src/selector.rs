//! Concept selection for full runs.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use ontoloom_core::{ConceptItem, ConceptSelection, ConceptSelector, Error, Result, SelectorType};

/// PostgreSQL implementation of [`ConceptSelector`].
///
/// Terminology and code-set selections yield every code with its main
/// string. A query selection runs caller-supplied SQL that must return
/// `code_id`, `code` and `text` columns.
#[derive(Clone)]
pub struct PgSelector {
    pool: PgPool,
    schema: String,
}

impl PgSelector {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    fn sql_for(&self, selector_type: SelectorType) -> String {
        let s = &self.schema;
        match selector_type {
            SelectorType::Terminology => format!(
                "SELECT c.id AS code_id, c.code, s.str AS text \
                 FROM {s}.codes c \
                 INNER JOIN {s}.strs s ON s.id = c.main_str_id \
                 WHERE c.terminology = $1 \
                 ORDER BY c.code, c.id"
            ),
            SelectorType::CodeSet => format!(
                "SELECT c.id AS code_id, c.code, s.str AS text \
                 FROM {s}.code_sets cs \
                 INNER JOIN {s}.codes c ON c.id = cs.code_id \
                 INNER JOIN {s}.strs s ON s.id = c.main_str_id \
                 WHERE cs.set_name = $1 \
                 ORDER BY c.code, c.id"
            ),
            SelectorType::Query => String::new(),
        }
    }
}

#[async_trait]
impl ConceptSelector for PgSelector {
    #[instrument(skip(self, selection), fields(
        subsystem = "database",
        component = "selector",
        op = "select",
        selector_type = ?selection.selector_type,
    ))]
    async fn select(&self, selection: &ConceptSelection) -> Result<Vec<ConceptItem>> {
        let rows = match selection.selector_type {
            SelectorType::Query => {
                if selection.value.trim().is_empty() {
                    return Err(Error::Config("query selector needs SQL text".into()));
                }
                let sql = format!(
                    "SELECT code_id, code, text FROM ({}) AS selected",
                    selection.value.trim().trim_end_matches(';')
                );
                sqlx::query(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| Error::StructuralQuery(e.to_string()))?
            }
            other => {
                sqlx::query(&self.sql_for(other))
                    .bind(&selection.value)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let items = rows
            .into_iter()
            .map(|row| -> Result<ConceptItem> {
                Ok(ConceptItem {
                    code_id: Some(row.try_get("code_id")?),
                    code: row.try_get("code")?,
                    text: row.try_get("text")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(result_count = items.len(), "Selected concepts");
        Ok(items)
    }
}
