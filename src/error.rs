//! # Error Handling
//!
//! The service-level error type and its mapping to HTTP responses. Only
//! caller-facing problems live here: a malformed chunk upload, a finalize
//! for a session that does not exist, a bad config update. Provider
//! failures never surface as an `AppError` — the finalizer logs and
//! swallows them by design, so an utterance lost to a flaky provider is
//! invisible to the ingest path.
//!
//! ## JSON Error Envelope:
//! ```json
//! {
//!   "error": {
//!     "type": "not_found",
//!     "message": "No session with id 's1'",
//!     "timestamp": "2025-06-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors a request handler can answer with.
#[derive(Debug)]
pub enum AppError {
    /// Unexpected server-side failure (500).
    Internal(String),

    /// The caller sent something unusable (400).
    BadRequest(String),

    /// The addressed session or resource does not exist (404).
    NotFound(String),

    /// Configuration could not be loaded or applied (500).
    Config(String),

    /// A supplied value failed validation (400).
    Validation(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, kind, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": kind,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON bodies that fail to parse are the caller's problem, not ours.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        use actix_web::http::StatusCode;

        assert_eq!(
            AppError::NotFound("x".into()).error_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::BadRequest("x".into()).error_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Internal("x".into()).error_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_display_includes_message() {
        let err = AppError::NotFound("No session with id 's1'".into());
        assert!(err.to_string().contains("s1"));
    }
}
