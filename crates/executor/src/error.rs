//! Executor error types.

use thiserror::Error;

/// Environment-level faults. Business failures never use this type.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The inference task panicked.
    #[error("inference task panicked: {0}")]
    TaskPanicked(String),

    /// The inference task was cancelled by the runtime.
    #[error("inference task cancelled: {0}")]
    TaskCancelled(String),

    /// The output could not be serialized for hashing.
    #[error("output serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

impl From<tokio::task::JoinError> for ExecutorError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            ExecutorError::TaskPanicked(err.to_string())
        } else {
            ExecutorError::TaskCancelled(err.to_string())
        }
    }
}
