//! Error types for the cluster cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cluster cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// No seed node reachable, authentication rejected, or topology unreadable
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Network or node failure during an operation
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store answered with an error reply
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// Batch input or key has the wrong shape
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Logical key cannot be used
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cluster cache.
pub type Result<T> = std::result::Result<T, CacheError>;
