//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while parsing or encoding protocol values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Event name is not of the form `{resource}.items.{operation}`.
    #[error("invalid event name: {0:?}")]
    InvalidEventName(String),

    /// Unknown operation keyword.
    #[error("unknown operation: {0:?}")]
    UnknownOperation(String),

    /// Timestamp could not be parsed.
    #[error("invalid timestamp {value:?}: {message}")]
    InvalidTimestamp {
        /// The offending text.
        value: String,
        /// Parser message.
        message: String,
    },

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
