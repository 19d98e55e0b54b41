//! Upsert-by-unique-key.
//!
//! Every persisted entity declares one or more unique key sets. A write
//! looks the row up over all key sets; more than one hit is a data
//! integrity error. When a row exists, its non-null values fill the null
//! fields of the incoming record and the row is only updated if some field
//! actually differs. Every path hands back the row as stored, so generated
//! ids and defaults such as `created_at` reach the caller.

use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use ontoloom_core::{Error, Result};

/// A typed, nullable column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Text(Option<String>),
    Uuid(Option<Uuid>),
    Float(Option<f64>),
    Int(Option<i64>),
    Bool(Option<bool>),
    Json(Option<serde_json::Value>),
}

impl Field {
    pub fn is_null(&self) -> bool {
        match self {
            Field::Text(v) => v.is_none(),
            Field::Uuid(v) => v.is_none(),
            Field::Float(v) => v.is_none(),
            Field::Int(v) => v.is_none(),
            Field::Bool(v) => v.is_none(),
            Field::Json(v) => v.is_none(),
        }
    }

    /// Read `column` from `row` as the same variant as `self`.
    fn decode_like(&self, row: &PgRow, column: &str) -> Result<Field> {
        let field = match self {
            Field::Text(_) => Field::Text(row.try_get(column)?),
            Field::Uuid(_) => Field::Uuid(row.try_get(column)?),
            Field::Float(_) => Field::Float(row.try_get(column)?),
            Field::Int(_) => Field::Int(row.try_get(column)?),
            Field::Bool(_) => Field::Bool(row.try_get(column)?),
            Field::Json(_) => Field::Json(row.try_get(column)?),
        };
        Ok(field)
    }

    fn bind<'q>(
        self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            Field::Text(v) => query.bind(v),
            Field::Uuid(v) => query.bind(v),
            Field::Float(v) => query.bind(v),
            Field::Int(v) => query.bind(v),
            Field::Bool(v) => query.bind(v),
            Field::Json(v) => query.bind(v),
        }
    }
}

/// Ordered column/value pairs of one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(&'static str, Field)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &'static str, value: Field) -> Self {
        match self.0.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.0.push((column, value)),
        }
        self
    }

    pub fn get(&self, column: &str) -> Option<&Field> {
        self.0.iter().find(|(c, _)| *c == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().map(|(c, _)| *c)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of merging an incoming record into an existing one.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub fields: Fields,
    pub changed: bool,
}

/// Fill null incoming fields from `existing` and report whether anything
/// differs from what is stored.
pub fn merge(incoming: Fields, existing: &Fields) -> Merged {
    let mut changed = false;
    let fields = incoming
        .0
        .into_iter()
        .map(|(column, value)| {
            let stored = existing.get(column);
            let value = match stored {
                Some(old) if value.is_null() && !old.is_null() => old.clone(),
                _ => value,
            };
            if stored != Some(&value) {
                changed = true;
            }
            (column, value)
        })
        .collect();
    Merged {
        fields: Fields(fields),
        changed,
    }
}

/// At most one row may match a unique-key lookup.
pub fn at_most_one<T>(mut rows: Vec<T>, what: &str) -> Result<Option<T>> {
    match rows.len() {
        0 => Ok(None),
        1 => Ok(rows.pop()),
        n => Err(Error::DataIntegrity(format!(
            "{} rows match the unique keys of {}",
            n, what
        ))),
    }
}

/// Table plus the unique key sets a record is looked up by.
#[derive(Debug, Clone, Copy)]
pub struct UpsertTarget<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    pub key_sets: &'a [&'a [&'static str]],
}

impl UpsertTarget<'_> {
    fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// `SELECT` over every key set whose columns are all non-null.
    fn lookup_sql(&self, fields: &Fields) -> Result<(String, Vec<Field>)> {
        let mut binds = Vec::new();
        let mut groups = Vec::new();
        for key_set in self.key_sets {
            let values: Option<Vec<&Field>> = key_set
                .iter()
                .map(|c| fields.get(c).filter(|v| !v.is_null()))
                .collect();
            let Some(values) = values else {
                continue;
            };
            let conds: Vec<String> = key_set
                .iter()
                .zip(values)
                .map(|(c, v)| {
                    binds.push(v.clone());
                    format!("{} = ${}", c, binds.len())
                })
                .collect();
            groups.push(format!("({})", conds.join(" AND ")));
        }
        if groups.is_empty() {
            return Err(Error::Config(format!(
                "no complete unique key for {}",
                self.table
            )));
        }
        Ok((
            format!(
                "SELECT * FROM {} WHERE {}",
                self.qualified(),
                groups.join(" OR ")
            ),
            binds,
        ))
    }

    fn insert_sql(&self, fields: &Fields) -> String {
        let columns: Vec<&str> = fields.columns().collect();
        let holders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            self.qualified(),
            columns.join(", "),
            holders.join(", ")
        )
    }

    fn update_sql(&self, fields: &Fields) -> String {
        let sets: Vec<String> = fields
            .columns()
            .enumerate()
            .map(|(i, c)| format!("{} = ${}", c, i + 1))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE id = ${} RETURNING *",
            self.qualified(),
            sets.join(", "),
            fields.len() + 1
        )
    }
}

/// Insert `fields` or merge them into the single existing row; returns the
/// row id.
pub async fn upsert(pool: &PgPool, target: UpsertTarget<'_>, fields: Fields) -> Result<Uuid> {
    let row = upsert_row(pool, target, fields).await?;
    Ok(row.try_get("id")?)
}

/// Like [`upsert`], but returns the whole row as it is stored after the
/// write.
pub async fn upsert_row(pool: &PgPool, target: UpsertTarget<'_>, fields: Fields) -> Result<PgRow> {
    let (sql, binds) = target.lookup_sql(&fields)?;
    let mut query = sqlx::query(&sql);
    for bind in binds {
        query = bind.bind(query);
    }
    let rows = query.fetch_all(pool).await?;

    let Some(row) = at_most_one(rows, target.table)? else {
        let sql = target.insert_sql(&fields);
        let mut query = sqlx::query(&sql);
        for (_, value) in fields.0 {
            query = value.bind(query);
        }
        let row = query.fetch_one(pool).await?;
        let id: Uuid = row.try_get("id")?;
        debug!(table = target.table, %id, "Inserted row");
        return Ok(row);
    };

    let id: Uuid = row.try_get("id")?;
    let mut existing = Fields::new();
    for (column, value) in &fields.0 {
        existing = existing.with(*column, value.decode_like(&row, column)?);
    }
    let merged = merge(fields, &existing);
    if !merged.changed {
        return Ok(row);
    }
    let sql = target.update_sql(&merged.fields);
    let mut query = sqlx::query(&sql);
    for (_, value) in merged.fields.0 {
        query = value.bind(query);
    }
    let updated = query.bind(id).fetch_one(pool).await?;
    debug!(table = target.table, %id, "Updated row");
    Ok(updated)
}

/// Id of the interned string `text`, inserting it when new.
pub async fn ensure_str(pool: &PgPool, schema: &str, text: &str) -> Result<Uuid> {
    upsert(
        pool,
        UpsertTarget {
            schema,
            table: "strs",
            key_sets: &[&["str"]],
        },
        Fields::new().with("str", Field::Text(Some(text.to_string()))),
    )
    .await
}
