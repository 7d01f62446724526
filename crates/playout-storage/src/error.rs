//! Storage error types.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Failures moving rendered media in or out of object storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Media store misconfigured: {0}")]
    ConfigError(String),

    #[error("No media object at {0}")]
    NotFound(String),

    #[error("Media upload failed: {0}")]
    UploadFailed(String),

    #[error("Media download failed: {0}")]
    DownloadFailed(String),

    #[error("Invalid object url: {0}")]
    InvalidUrl(String),

    #[error("Local media I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    /// Network hiccups are worth retrying; missing objects and bad urls are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::UploadFailed(_) | StorageError::DownloadFailed(_) | StorageError::Io(_)
        )
    }
}
