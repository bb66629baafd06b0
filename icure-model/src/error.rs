//! Model error types.

use thiserror::Error;

/// Result type for model construction and decoding.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building or decoding model values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid access control key {key:?}: {reason}")]
    InvalidAccessControlKey { key: String, reason: String },

    #[error("a share request needs at least one access control key")]
    MissingAccessControlKeys,

    #[error("root delegation must be a self-delegation, got delegator {delegator} and delegate {delegate}")]
    InvalidRootDelegation { delegator: String, delegate: String },
}
