//! Scheduler error types.

use thiserror::Error;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Switcher rejected {room_id}: {message}")]
    SwitchFailed { room_id: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Alert delivery failed: {0}")]
    AlertFailed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Lease error: {0}")]
    Lease(#[from] redis::RedisError),

    #[error("Store error: {0}")]
    Store(#[from] playout_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] playout_queue::QueueError),
}

impl SchedulerError {
    pub fn switch_failed(room_id: impl ToString, message: impl Into<String>) -> Self {
        Self::SwitchFailed {
            room_id: room_id.to_string(),
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::SwitchFailed { .. } | SchedulerError::Http(_) => true,
            SchedulerError::Store(e) => e.is_retryable(),
            SchedulerError::Lease(e) => e.is_io_error() || e.is_timeout(),
            _ => false,
        }
    }
}
