//! Engine error types.
//!
//! Only caller mistakes and infrastructure failures are errors. Requests that
//! cannot be applied are reported as rejections inside the results.

use icure_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type LogicResult<T> = Result<T, LogicError>;

#[derive(Debug, Error)]
pub enum LogicError {
    /// Stale revision on a direct modification.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Direct modification of security metadata.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// Invariant violated by the caller, e.g. several ROOT requests for one
    /// entity.
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("exchange data map publication failed: {0}")]
    Publisher(String),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
