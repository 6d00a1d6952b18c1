//! Error types for the dosewise_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for dosewise_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A schedule or preference payload failed validation
    #[error("validation failed for `{field}`: {message}")]
    Validation { field: String, message: String },

    /// Operation not legal from the event's current lifecycle status
    #[error("invalid state for {operation}: event {event_id} is {status}")]
    InvalidState {
        operation: &'static str,
        event_id: uuid::Uuid,
        status: String,
    },

    /// Undo was requested after the undo window closed
    #[error("undo window expired: {elapsed_seconds}s elapsed, {allowed_seconds}s allowed")]
    UndoWindowExpired {
        elapsed_seconds: i64,
        allowed_seconds: i64,
    },

    /// Unknown medication/schedule/event id
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Safety profile or preference provider unreachable
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a field-level validation failure
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}
