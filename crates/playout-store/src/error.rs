//! Store error types.

use playout_models::{JobStatus, ModelError};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A conditional insert found a conflicting record.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A compare-and-set on a job status lost.
    #[error("Status conflict on {id}: expected {expected}, found {actual}")]
    StatusConflict {
        id: String,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("Invalid record: {0}")]
    Model(#[from] ModelError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::StatusConflict { .. })
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }
}
