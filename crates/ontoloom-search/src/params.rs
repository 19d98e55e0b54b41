//! Named query parameters.
//!
//! Subqueries are written with `:name` placeholders so each can declare the
//! values it needs independently. Before execution the assembled SQL is
//! compiled to Postgres positional binds (`$1`, `$2`, ...), with one bind per
//! distinct name.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use ontoloom_core::{BoundQuery, Error, QueryParam, Result};

/// `::` casts are matched first so they are never mistaken for a parameter.
static PARAM_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"::|:([A-Za-z_][A-Za-z0-9_]*)").expect("parameter pattern is valid")
});

/// Ordered name → value map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedParams {
    entries: Vec<(String, QueryParam)>,
}

impl NamedParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: QueryParam) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or overwrite `name`.
    pub fn set(&mut self, name: impl Into<String>, value: QueryParam) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&QueryParam> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge `other` into `self`.
    ///
    /// A name already present with a different value is a configuration
    /// error; an identical value is accepted.
    pub fn merge(&mut self, other: &NamedParams) -> Result<()> {
        for (name, value) in &other.entries {
            match self.get(name) {
                Some(existing) if existing != value => {
                    return Err(Error::Config(format!(
                        "query parameter '{}' has conflicting values {:?} and {:?}",
                        name, existing, value
                    )))
                }
                Some(_) => {}
                None => self.entries.push((name.clone(), value.clone())),
            }
        }
        Ok(())
    }
}

/// Compile `:name` placeholders in `sql` to positional binds.
///
/// Every placeholder must have a value in `params`; a name used more than
/// once reuses its first position.
pub fn compile(sql: &str, params: &NamedParams) -> Result<BoundQuery> {
    let mut order: Vec<String> = Vec::new();
    let mut missing: Option<String> = None;

    let compiled = PARAM_PATTERN.replace_all(sql, |caps: &Captures| {
        let Some(name) = caps.get(1) else {
            return "::".to_string();
        };
        let name = name.as_str();
        if params.get(name).is_none() && missing.is_none() {
            missing = Some(name.to_string());
        }
        let pos = match order.iter().position(|n| n == name) {
            Some(i) => i + 1,
            None => {
                order.push(name.to_string());
                order.len()
            }
        };
        format!("${}", pos)
    });

    if let Some(name) = missing {
        return Err(Error::Config(format!(
            "query uses parameter ':{}' but no value was supplied",
            name
        )));
    }

    let params = order
        .iter()
        .map(|n| params.get(n).cloned().unwrap_or(QueryParam::Null))
        .collect();
    Ok(BoundQuery {
        sql: compiled.into_owned(),
        params,
    })
}
