//! Error types for ontoloom.
//!
//! The variants follow the failure taxonomy both engines share:
//!
//! | Class | Variant | Policy |
//! |-------|---------|--------|
//! | configuration | [`Error::Config`] | fatal, never retried |
//! | transient I/O | [`Error::Inference`], [`Error::Request`] | retried, then fail-fast flag |
//! | malformed response | [`Error::MalformedResponse`] | fail-fast flag |
//! | structural query | [`Error::StructuralQuery`] | fatal, never retried |
//! | data integrity | [`Error::DataIntegrity`] | fatal |

use thiserror::Error;

/// Result type alias using ontoloom's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ontoloom operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error (missing placeholder, incomplete specificity
    /// settings, unknown adjudication rule or vector source, conflicting
    /// query parameter)
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM call failed after the call's own handling
    #[error("Inference error: {0}")]
    Inference(String),

    /// Model output did not match the negotiated response shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Assembled ranking query failed to execute
    #[error("Structural query error: {0}")]
    StructuralQuery(String),

    /// More than one row matched a supposedly unique lookup
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Requested behavior exists in configuration but has no implementation
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Session spend ceiling exceeded; the run must stop immediately
    #[error("Spend limit exceeded: spent {spent:.6} of {limit:.6}")]
    SpendLimitExceeded { spent: f64, limit: f64 },

    /// Run was cancelled cooperatively
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the LLM session should retry the call that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Inference(_) | Error::Request(_))
    }

    /// Whether this error must abort a run regardless of the fail-fast flag.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::DataIntegrity(_)
                | Error::StructuralQuery(_)
                | Error::NotImplemented(_)
                | Error::SpendLimitExceeded { .. }
                | Error::Database(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
