//! Error types for the reconciliation engine.

use catsync_protocol::{Operation, ProtocolError, RecordId};
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while mirroring records.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// A Target create/update/delete call failed.
    #[error("remote {operation} failed: {message}")]
    RemoteCall {
        /// The operation that was attempted.
        operation: Operation,
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// No Target id is known for the record.
    #[error("record {record_id} not found: {reason}")]
    RecordNotFound {
        /// Source record id.
        record_id: RecordId,
        /// Why the lookup came up empty.
        reason: String,
    },

    /// The echo guard could not read the record's provenance.
    #[error("metadata fetch failed for {record_id}: {message}")]
    MetadataFetch {
        /// Source record id.
        record_id: RecordId,
        /// Error message.
        message: String,
    },

    /// The Target write landed but the Source could not be stamped.
    #[error("write-back failed for {record_id}: {message}")]
    WriteBack {
        /// Source record id.
        record_id: RecordId,
        /// Error message.
        message: String,
        /// Whether the write can be retried.
        retryable: bool,
    },

    /// Source store transport error.
    #[error("source error: {message}")]
    Source {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// Event name did not parse.
    #[error("invalid event name: {0}")]
    InvalidEventName(String),

    /// A filter handler returned a payload of a different kind.
    #[error("filter for {event} changed payload shape from {expected} to {actual}")]
    PayloadShapeChanged {
        /// Event the filter was registered for.
        event: String,
        /// Expected payload kind.
        expected: Operation,
        /// Kind that came back.
        actual: Operation,
    },

    /// Encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Configuration value is invalid.
    #[error("config error: {0}")]
    Config(String),
}

impl SyncError {
    /// Creates a retryable remote call error.
    pub fn remote_retryable(operation: Operation, message: impl Into<String>) -> Self {
        Self::RemoteCall {
            operation,
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote call error.
    pub fn remote_fatal(operation: Operation, message: impl Into<String>) -> Self {
        Self::RemoteCall {
            operation,
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a record-not-found error.
    pub fn not_found(record_id: RecordId, reason: impl Into<String>) -> Self {
        Self::RecordNotFound {
            record_id,
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::RemoteCall { retryable, .. } => *retryable,
            SyncError::WriteBack { retryable, .. } => *retryable,
            SyncError::Source { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidEventName(name) => SyncError::InvalidEventName(name),
            other => SyncError::Codec(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::remote_retryable(Operation::Create, "503").is_retryable());
        assert!(!SyncError::remote_fatal(Operation::Update, "unknown id").is_retryable());
        assert!(!SyncError::not_found(RecordId::new("1"), "no reference id").is_retryable());
        assert!(SyncError::Source {
            message: "connection reset".into(),
            retryable: true,
        }
        .is_retryable());
        assert!(!SyncError::Codec("bad json".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::remote_fatal(Operation::Delete, "404 not found");
        assert_eq!(err.to_string(), "remote delete failed: 404 not found");

        let err = SyncError::not_found(RecordId::new("42"), "no reference id");
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn protocol_errors_convert() {
        let err: SyncError = ProtocolError::InvalidEventName("x".into()).into();
        assert!(matches!(err, SyncError::InvalidEventName(_)));
    }
}
