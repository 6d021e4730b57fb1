//! Error types for socialsweep
//!
//! This module provides error handling for the orchestration engine, including:
//! - Domain-specific error types (ledger, queue, transitions, adapters)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes
//!
//! Fetch failures (network, rate limiting, ...) are not errors in this sense:
//! adapters report them as an [`ErrorClass`](crate::types::ErrorClass) and the
//! retry policy absorbs them.

use crate::types::{RequestId, Status};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for socialsweep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for socialsweep
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "window.granularity")
        key: Option<String>,
    },

    /// The persisted ledger could not be read or parsed
    #[error("corrupt state in {location}: {reason}")]
    CorruptState {
        /// File path or table the unreadable state came from
        location: String,
        /// Parser or I/O message
        reason: String,
    },

    /// A status change that the request lifecycle does not allow
    #[error("cannot move request {id} from {from} to {to}")]
    InvalidTransition {
        /// The request whose transition was rejected
        id: RequestId,
        /// Current status
        from: Status,
        /// Requested status
        to: Status,
    },

    /// Dequeue on an empty queue
    #[error("queue is empty")]
    EmptyQueue,

    /// Request not found in the ledger
    #[error("request not found: {0}")]
    NotFound(RequestId),

    /// No fetch adapter registered under this name
    #[error("unknown source adapter: {0}")]
    UnknownAdapter(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside of a fetch attempt (client construction, API server)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new requests
    #[error("shutdown in progress: not accepting new requests")]
    ShuttingDown,

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// API error response format
///
/// Returned by API endpoints when an error occurs.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "request_not_found",
///     "message": "request not found: 3fa2...",
///     "details": { "request_id": "3fa2..." }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "request_not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::UnknownAdapter(_) => 422,

            Error::NotFound(_) => 404,

            Error::InvalidTransition { .. } => 409,
            Error::EmptyQueue => 409,

            Error::CorruptState { .. } => 500,
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            Error::Network(_) => 502,

            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::CorruptState { .. } => "corrupt_state",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::EmptyQueue => "empty_queue",
            Error::NotFound(_) => "request_not_found",
            Error::UnknownAdapter(_) => "unknown_adapter",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ShuttingDown => "shutting_down",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::NotFound(id) => Some(serde_json::json!({
                "request_id": id,
            })),
            Error::InvalidTransition { id, from, to } => Some(serde_json::json!({
                "request_id": id,
                "from": from,
                "to": to,
            })),
            Error::UnknownAdapter(name) => Some(serde_json::json!({
                "source_adapter": name,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            Error::CorruptState { location, .. } => Some(serde_json::json!({
                "location": location,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_message_names_both_states() {
        let error = Error::InvalidTransition {
            id: RequestId::from("abc"),
            from: Status::Completed,
            to: Status::Cancelled,
        };
        let msg = error.to_string();
        assert!(msg.contains("abc"), "got: {msg}");
        assert!(msg.contains("completed"), "got: {msg}");
        assert!(msg.contains("cancelled"), "got: {msg}");
    }

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(Error::NotFound(RequestId::from("x")).status_code(), 404);
        assert_eq!(Error::ShuttingDown.status_code(), 503);
        assert_eq!(Error::UnknownAdapter("nope".into()).status_code(), 422);
        assert_eq!(
            Error::InvalidTransition {
                id: RequestId::from("x"),
                from: Status::Failed,
                to: Status::Cancelled,
            }
            .status_code(),
            409
        );
    }

    #[test]
    fn api_error_carries_request_id_details() {
        let api_error: ApiError = Error::NotFound(RequestId::from("r-1")).into();
        assert_eq!(api_error.error.code, "request_not_found");
        let details = api_error.error.details.unwrap();
        assert_eq!(details["request_id"], "r-1");
    }

    #[test]
    fn corrupt_state_is_internal() {
        let error = Error::CorruptState {
            location: "/tmp/ledger.json".into(),
            reason: "expected value at line 1".into(),
        };
        assert_eq!(error.status_code(), 500);
        assert_eq!(error.error_code(), "corrupt_state");
    }
}
