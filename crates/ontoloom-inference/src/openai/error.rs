//! Classification of OpenAI-compatible error replies.
//!
//! The session retries only [`Error::is_retryable`] errors, so the mapping
//! here decides which failures cost another attempt: rate limits and
//! upstream faults do, bad keys, unknown models, exhausted quota and
//! oversized prompts do not.

use ontoloom_core::Error;

use super::types::OpenAIErrorResponse;

/// Kind of failure reported by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFailure {
    Auth,
    /// Account quota or billing limit reached; waiting does not help.
    QuotaExhausted,
    RateLimited,
    UnknownModel,
    PromptTooLong,
    Upstream,
    Other,
}

impl ApiFailure {
    /// Classify from the HTTP status and the error `type`/`code` fields.
    pub fn classify(status: u16, error_type: &str, code: &str) -> Self {
        let tagged = |needle: &str| error_type.contains(needle) || code.contains(needle);
        if tagged("insufficient_quota") || tagged("billing") {
            return Self::QuotaExhausted;
        }
        match status {
            401 | 403 => Self::Auth,
            429 => Self::RateLimited,
            404 => Self::UnknownModel,
            _ if tagged("model_not_found") => Self::UnknownModel,
            400 | 413 if tagged("context_length") || status == 413 => Self::PromptTooLong,
            500..=599 => Self::Upstream,
            _ => Self::Other,
        }
    }

    pub fn into_error(self, message: String) -> Error {
        match self {
            Self::Auth => Error::Config(format!("API key rejected: {}", message)),
            Self::QuotaExhausted => Error::Config(format!("API quota exhausted: {}", message)),
            Self::UnknownModel => Error::Config(format!("model not available: {}", message)),
            Self::PromptTooLong => Error::InvalidInput(format!("prompt too long: {}", message)),
            Self::RateLimited | Self::Upstream | Self::Other => Error::Inference(message),
        }
    }
}

/// Build the error for a non-success reply from its status and body.
pub fn error_from_body(status: u16, body: &str) -> Error {
    let (message, error_type, code) = match serde_json::from_str::<OpenAIErrorResponse>(body) {
        Ok(parsed) => (
            parsed.error.message,
            parsed.error.error_type,
            parsed.error.code.unwrap_or_default(),
        ),
        Err(_) => (body.trim().to_string(), String::new(), String::new()),
    };
    ApiFailure::classify(status, &error_type, &code)
        .into_error(format!("endpoint returned {}: {}", status, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_beats_rate_limit_status() {
        let failure = ApiFailure::classify(429, "insufficient_quota", "insufficient_quota");
        assert_eq!(failure, ApiFailure::QuotaExhausted);
        assert!(!failure.into_error("no credit".into()).is_retryable());
    }

    #[test]
    fn test_plain_rate_limit_is_retried() {
        let failure = ApiFailure::classify(429, "requests", "rate_limit_exceeded");
        assert_eq!(failure, ApiFailure::RateLimited);
        assert!(failure.into_error("slow down".into()).is_retryable());
    }

    #[test]
    fn test_context_length_is_invalid_input() {
        let failure = ApiFailure::classify(400, "invalid_request_error", "context_length_exceeded");
        assert_eq!(failure, ApiFailure::PromptTooLong);
        assert!(matches!(failure.into_error("x".into()), Error::InvalidInput(_)));
    }

    #[test]
    fn test_error_from_json_body() {
        let body = r#"{"error": {"message": "Incorrect API key", "type": "invalid_request_error", "code": "invalid_api_key"}}"#;
        let err = error_from_body(401, body);
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("Incorrect API key"));
    }

    #[test]
    fn test_error_from_plain_body() {
        let err = error_from_body(502, "Bad Gateway\n");
        assert!(err.is_retryable());
        assert!(err.to_string().ends_with("502: Bad Gateway"));
    }
}
