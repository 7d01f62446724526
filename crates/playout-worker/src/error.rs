//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Render timed out after {0}s")]
    RenderTimeout(u64),

    #[error("Store error: {0}")]
    Store(#[from] playout_store::StoreError),

    #[error("Media error: {0}")]
    Media(#[from] playout_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] playout_queue::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] playout_storage::StorageError),

    #[error("Invalid record: {0}")]
    Model(#[from] playout_models::ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Store conflicts surface to callers (the API maps them to 409).
    pub fn is_conflict(&self) -> bool {
        matches!(self, WorkerError::Store(e) if e.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkerError::Store(e) if e.is_not_found())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Media(e) => e.is_transient(),
            WorkerError::Store(e) => e.is_retryable(),
            WorkerError::Storage(e) => e.is_retryable(),
            WorkerError::Queue(_) | WorkerError::Io(_) => true,
            _ => false,
        }
    }
}
