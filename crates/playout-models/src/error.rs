//! Model-level errors.

use thiserror::Error;

use crate::JobStatus;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Invalid job status transition: {from} -> {to}")]
    InvalidStatusTransition { from: JobStatus, to: JobStatus },

    #[error("Unknown job status: {0}")]
    UnknownJobStatus(String),

    /// Content cannot be rendered with the configuration at hand. Not retryable.
    #[error("Render configuration error: {0}")]
    RenderConfig(String),

    #[error("Malformed render job data: {0}")]
    MalformedJobData(String),
}

impl ModelError {
    pub fn render_config(msg: impl Into<String>) -> Self {
        Self::RenderConfig(msg.into())
    }

    pub fn malformed_data(msg: impl Into<String>) -> Self {
        Self::MalformedJobData(msg.into())
    }
}
