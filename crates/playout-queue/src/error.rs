//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// A render job id could not be announced.
    #[error("Failed to announce render job: {0}")]
    Announce(String),

    /// Reading the consumer group failed.
    #[error("Failed to read render queue: {0}")]
    Read(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Malformed queue payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn announce(msg: impl Into<String>) -> Self {
        Self::Announce(msg.into())
    }

    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }
}
