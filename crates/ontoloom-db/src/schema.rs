//! Schema name validation.
//!
//! Repositories interpolate the schema into SQL text, so the name must be a
//! plain PostgreSQL identifier.

use ontoloom_core::{Error, Result};

const RESERVED: &[&str] = &[
    "pg_catalog",
    "information_schema",
    "pg_toast",
    "select",
    "insert",
    "update",
    "delete",
    "drop",
    "create",
    "alter",
    "grant",
    "revoke",
];

/// Validate a PostgreSQL schema name.
///
/// ```
/// use ontoloom_db::validate_schema_name;
///
/// assert!(validate_schema_name("ontoloom").is_ok());
/// assert!(validate_schema_name("1bad").is_err());
/// assert!(validate_schema_name("a;drop").is_err());
/// ```
pub fn validate_schema_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("Schema name cannot be empty".to_string()));
    }
    // PostgreSQL identifier limit
    if name.len() > 63 {
        return Err(Error::Config(format!(
            "Schema name exceeds 63 character limit: {} characters",
            name.len()
        )));
    }
    if let Some(first) = name.chars().next() {
        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(Error::Config(format!(
                "Schema name must start with a letter or underscore, found: '{}'",
                first
            )));
        }
    }
    if let Some(ch) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(Error::Config(format!(
            "Schema name contains invalid character: '{}'",
            ch
        )));
    }
    if RESERVED.contains(&name.to_lowercase().as_str()) {
        return Err(Error::Config(format!("Schema name '{}' is reserved", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_schema_names() {
        assert!(validate_schema_name("ontoloom").is_ok());
        assert!(validate_schema_name("_scratch_2").is_ok());
        assert!(validate_schema_name("public").is_ok());
    }

    #[test]
    fn test_invalid_schema_names() {
        assert!(validate_schema_name("").is_err());
        assert!(validate_schema_name("9lives").is_err());
        assert!(validate_schema_name("has-dash").is_err());
        assert!(validate_schema_name("DROP").is_err());
        assert!(validate_schema_name(&"x".repeat(64)).is_err());
    }
}
