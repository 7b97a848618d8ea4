//! Log store errors.

use thiserror::Error;

/// Log store error types.
#[derive(Debug, Error)]
pub enum LogStoreError {
    /// Unknown log level name.
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Unknown log category name.
    #[error("Invalid log category: {0}")]
    InvalidCategory(String),

    /// File system failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
