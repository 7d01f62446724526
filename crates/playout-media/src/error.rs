//! Error types for media operations.

use std::path::PathBuf;

use playout_storage::StorageError;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed { message: String, stderr: Option<String> },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    /// The source cannot be fetched by this encoder at all.
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(message: impl Into<String>, stderr: Option<String>, exit_code: Option<i32>) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn unsupported_source(message: impl Into<String>) -> Self {
        Self::UnsupportedSource(message.into())
    }

    /// Whether another attempt may succeed without anyone changing the input.
    pub fn is_transient(&self) -> bool {
        match self {
            MediaError::Timeout(_) | MediaError::Io(_) => true,
            MediaError::Storage(e) => e.is_retryable(),
            MediaError::FfmpegFailed { stderr: Some(stderr), .. } => is_network_failure(stderr),
            _ => false,
        }
    }
}

/// FFmpeg reading a remote input reports network trouble on stderr.
fn is_network_failure(stderr: &str) -> bool {
    const MARKERS: [&str; 5] = [
        "Connection reset",
        "Connection refused",
        "Connection timed out",
        "Server returned 5",
        "I/O error",
    ];
    MARKERS.iter().any(|marker| stderr.contains(marker))
}
