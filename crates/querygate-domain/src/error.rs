//! Error types for query execution.

use thiserror::Error;

/// Whether the remote side considers a failure worth retrying.
///
/// The gate itself never retries; the classification is carried through
/// so callers can decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Transient failure (connection reset, 5xx, rate limit).
    Retryable,
    /// Permanent failure (bad query, auth rejected).
    Fatal,
}

/// Failure reported by the transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error ({kind:?}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    /// Creates a retryable transport error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Retryable,
            message: message.into(),
        }
    }

    /// Creates a fatal transport error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Fatal,
            message: message.into(),
        }
    }

    /// Returns true if the transport marked this failure as retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind == TransportErrorKind::Retryable
    }
}

/// Errors surfaced to callers of the query gate.
///
/// Cloneable so a single failure can be delivered to every waiter of a key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Operation name or variables could not be fingerprinted.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The transport failed this attempt.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The transport deadline passed before a result arrived.
    #[error("operation '{operation}' timed out after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    /// A value is larger than the whole cache.
    #[error("value of {size_bytes} bytes exceeds cache ceiling of {max_bytes} bytes")]
    Capacity {
        size_bytes: usize,
        max_bytes: usize,
    },

    /// A pending execution ended without producing a result.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl QueryError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        QueryError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        QueryError::Internal {
            message: message.into(),
        }
    }
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;
