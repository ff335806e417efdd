//! Error types for the session dispatch loop, the rate limiter, and the cache engine.
//!
//! Mirrors the teacher's `RateLimitError`/`StorageError`/`ConfigError` split: a
//! crate-level enum unifying per-domain error kinds via `#[from]`, plus the
//! domain enums themselves for callers that want to match narrowly.

use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type returned by session construction and dispatch.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration; raised at construction, never from dispatch.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Persistence backend unavailable or failed; limiter/cache invariants remain intact.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Admission was refused under `raise_errors`.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// How long the caller should wait before retrying.
        retry_after: Duration,
        /// The scope (global/host/endpoint) whose limit was exhausted.
        scope: &'static str,
    },

    /// The transport failed to deliver the request (network/timeout).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A cached response could not be deserialized; treated as a cache miss by
    /// the caller, this variant exists for diagnostics and testing only.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

/// Configuration-related errors, raised only at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An algorithm parameter is out of range (zero limit, non-positive rate, etc).
    #[error("invalid algorithm configuration: {0}")]
    InvalidAlgorithm(String),

    /// A backend connection parameter is invalid or contradictory.
    #[error("invalid backend configuration: {0}")]
    InvalidBackend(String),

    /// A required configuration field was not supplied.
    #[error("missing required configuration: {0}")]
    MissingRequired(String),
}

/// Persistence backend errors (memory, KV, SQL).
#[derive(Debug, Error)]
pub enum BackendError {
    /// The operation failed; `retryable` indicates whether a caller-level retry
    /// is sensible (e.g. a transient connection hiccup vs a logic error).
    #[error("{message}")]
    OperationFailed {
        /// Human-readable description of the failure.
        message: String,
        /// Whether retrying the same operation might succeed.
        retryable: bool,
    },

    /// A compare-and-swap exhausted its retry budget under contention.
    #[error("compare-and-swap exhausted its retry budget")]
    AtomicConflict,

    /// The connection pool (KV/SQL) has no available connections.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Failed to spawn or connect to the embedded KV server.
    #[error("embedded server error: {0}")]
    EmbeddedServer(String),
}

impl BackendError {
    /// Build an `OperationFailed` variant.
    pub fn operation_failed(message: impl Into<String>, retryable: bool) -> Self {
        Self::OperationFailed {
            message: message.into(),
            retryable,
        }
    }

    /// Whether this error represents a condition worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OperationFailed { retryable, .. } => *retryable,
            Self::AtomicConflict | Self::PoolExhausted => true,
            Self::EmbeddedServer(_) => false,
        }
    }
}

/// Errors surfaced by the pluggable HTTP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying network call failed.
    #[error("network request failed: {0}")]
    Network(String),

    /// The request exceeded its configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors from (de)serializing a cached response payload.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Encoding a response for storage failed.
    #[error("failed to encode cached response: {0}")]
    Encode(String),

    /// Decoding a stored payload back into a response failed.
    #[error("failed to decode cached response: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_retryable() {
        assert!(BackendError::operation_failed("x", true).is_retryable());
        assert!(!BackendError::operation_failed("x", false).is_retryable());
        assert!(BackendError::AtomicConflict.is_retryable());
        assert!(BackendError::PoolExhausted.is_retryable());
        assert!(!BackendError::EmbeddedServer("boom".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = Error::RateLimited {
            retry_after: Duration::from_secs(2),
            scope: "host",
        };
        assert!(err.to_string().contains("retry after"));
    }
}
