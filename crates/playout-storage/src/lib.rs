//! Object storage for broadcast media.
//!
//! This crate provides:
//! - [`MediaStore`], the upload/download contract the encoder relies on
//! - [`S3Storage`] for S3-compatible endpoints
//! - [`LocalMediaStore`] backed by a directory, for development and tests

pub mod client;
pub mod error;
pub mod local;

pub use client::{S3Config, S3Storage};
pub use error::{StorageError, StorageResult};
pub use local::LocalMediaStore;

use std::path::Path;

use async_trait::async_trait;

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Upload `path` under `key`, returning the URL players fetch it from.
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<String>;

    /// Fetch the object behind `url` (as returned by this store) into `path`.
    async fn download_file(&self, url: &str, path: &Path) -> StorageResult<()>;

    /// Whether `url` is one this store can download.
    fn owns_url(&self, url: &str) -> bool;
}
