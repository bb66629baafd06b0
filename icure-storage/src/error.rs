//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing documents.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage connection lock poisoned")]
    LockPoisoned,

    #[error("document update conflict: {0}")]
    Conflict(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
