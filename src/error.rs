//! Error types for the Pilum retrieval core.
//!
//! Every fallible operation in the crate returns [`Result<T>`], whose error
//! side is the [`PilumError`] enum. Each variant maps onto a stable
//! [`ErrorKind`] with a machine-readable code, so callers on the other side of
//! the library boundary can branch on the kind without parsing messages.
//!
//! # Examples
//!
//! ```
//! use pilum::error::{ErrorKind, PilumError, Result};
//!
//! fn lookup(limit: usize) -> Result<()> {
//!     if limit == 0 {
//!         return Err(PilumError::invalid_query("limit must be greater than 0"));
//!     }
//!     Ok(())
//! }
//!
//! let err = lookup(0).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::InvalidQuery);
//! assert_eq!(err.kind().code(), "INVALID_QUERY");
//! assert!(!err.is_retryable());
//! ```

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for Pilum operations.
#[derive(Error, Debug)]
pub enum PilumError {
    /// Establishing a connection to an external dependency failed.
    ///
    /// `transient` separates timeouts and refused connections (worth a
    /// retry) from authentication and configuration failures (not).
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String, transient: bool },

    /// No pooled connection became available before the acquire timeout.
    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),

    /// The pool has been shut down.
    #[error("Pool closed: {0}")]
    PoolClosed(String),

    /// A transaction was rolled back.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// A sub-search failed for a reason other than an empty result.
    #[error("Search failed: {0}")]
    SearchFailed(String),

    /// The injected embedding function failed.
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    /// The remote cache tier could not be used (error or open circuit).
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// A deadline expired before the operation completed.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The caller supplied an invalid query or option set.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The store reported that a query matched no rows.
    #[error("No rows returned")]
    NoRows,

    /// A driver-level query failed.
    #[error("Query error: {0}")]
    Query(String),

    /// A configuration value failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O errors (configuration files and similar).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with [`PilumError`].
pub type Result<T> = std::result::Result<T, PilumError>;

/// Stable classification of a [`PilumError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ConnectionFailed,
    PoolExhausted,
    TransactionFailed,
    SearchFailed,
    EmbeddingFailed,
    CacheUnavailable,
    Timeout,
    InvalidQuery,
    Internal,
}

impl ErrorKind {
    /// Stable code for the kind, safe to expose across the public contract.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionFailed => "CONNECTION_FAILED",
            ErrorKind::PoolExhausted => "POOL_EXHAUSTED",
            ErrorKind::TransactionFailed => "TRANSACTION_FAILED",
            ErrorKind::SearchFailed => "SEARCH_FAILED",
            ErrorKind::EmbeddingFailed => "EMBEDDING_FAILED",
            ErrorKind::CacheUnavailable => "CACHE_UNAVAILABLE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::InvalidQuery => "INVALID_QUERY",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl PilumError {
    /// Create a transient connection error (timeouts, refused connections).
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        PilumError::ConnectionFailed {
            message: msg.into(),
            transient: true,
        }
    }

    /// Create a non-transient connection error (authentication, bad target).
    pub fn connection_rejected<S: Into<String>>(msg: S) -> Self {
        PilumError::ConnectionFailed {
            message: msg.into(),
            transient: false,
        }
    }

    /// Create a new pool exhausted error.
    pub fn pool_exhausted<S: Into<String>>(msg: S) -> Self {
        PilumError::PoolExhausted(msg.into())
    }

    /// Create a new pool closed error.
    pub fn pool_closed<S: Into<String>>(msg: S) -> Self {
        PilumError::PoolClosed(msg.into())
    }

    /// Create a new transaction error.
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        PilumError::TransactionFailed(msg.into())
    }

    /// Create a new search error.
    pub fn search_failed<S: Into<String>>(msg: S) -> Self {
        PilumError::SearchFailed(msg.into())
    }

    /// Create a new embedding error.
    pub fn embedding<S: Into<String>>(msg: S) -> Self {
        PilumError::EmbeddingFailed(msg.into())
    }

    /// Create a new cache unavailable error.
    pub fn cache_unavailable<S: Into<String>>(msg: S) -> Self {
        PilumError::CacheUnavailable(msg.into())
    }

    /// Create a new timeout error.
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        PilumError::Timeout(msg.into())
    }

    /// Create a new invalid query error.
    pub fn invalid_query<S: Into<String>>(msg: S) -> Self {
        PilumError::InvalidQuery(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        PilumError::Query(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        PilumError::InvalidConfig(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PilumError::Other(msg.into())
    }

    /// The stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PilumError::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            PilumError::PoolExhausted(_) | PilumError::PoolClosed(_) => ErrorKind::PoolExhausted,
            PilumError::TransactionFailed(_) => ErrorKind::TransactionFailed,
            PilumError::SearchFailed(_) | PilumError::NoRows | PilumError::Query(_) => {
                ErrorKind::SearchFailed
            }
            PilumError::EmbeddingFailed(_) => ErrorKind::EmbeddingFailed,
            PilumError::CacheUnavailable(_) => ErrorKind::CacheUnavailable,
            PilumError::Timeout(_) => ErrorKind::Timeout,
            PilumError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            PilumError::InvalidConfig(_)
            | PilumError::Io(_)
            | PilumError::Json(_)
            | PilumError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PilumError::ConnectionFailed { transient, .. } => *transient,
            PilumError::PoolExhausted(_)
            | PilumError::CacheUnavailable(_)
            | PilumError::Timeout(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = PilumError::search_failed("keyword index offline");
        assert_eq!(error.to_string(), "Search failed: keyword index offline");

        let error = PilumError::pool_exhausted("postgres: no connection within 2000ms");
        assert_eq!(
            error.to_string(),
            "Pool exhausted: postgres: no connection within 2000ms"
        );

        let error = PilumError::connection("refused");
        assert_eq!(error.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_kind_codes_are_stable() {
        assert_eq!(PilumError::NoRows.kind(), ErrorKind::SearchFailed);
        assert_eq!(PilumError::pool_closed("x").kind().code(), "POOL_EXHAUSTED");
        assert_eq!(PilumError::timeout("x").kind().code(), "TIMEOUT");
        assert_eq!(PilumError::embedding("x").kind().code(), "EMBEDDING_FAILED");
        assert_eq!(PilumError::other("x").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PilumError::connection("timed out").is_retryable());
        assert!(!PilumError::connection_rejected("password authentication failed").is_retryable());
        assert!(PilumError::pool_exhausted("x").is_retryable());
        assert!(PilumError::cache_unavailable("x").is_retryable());
        assert!(!PilumError::invalid_query("x").is_retryable());
        assert!(!PilumError::transaction("x").is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error = PilumError::from(io_error);

        match error {
            PilumError::Io(_) => {} // Expected
            _ => panic!("Expected IO error variant"),
        }
    }
}
