//! Directory-backed media store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::MediaStore;

/// Stores objects under a root directory and hands out `file://` urls.
#[derive(Debug, Clone)]
pub struct LocalMediaStore {
    root: PathBuf,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let key = key.trim_start_matches('/');
        if key.is_empty() || key.split('/').any(|part| part == "..") {
            return Err(StorageError::InvalidUrl(format!("invalid object key {key:?}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn upload_file(&self, path: &Path, key: &str, _content_type: &str) -> StorageResult<String> {
        let target = self.path_for(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(path, &target).await?;
        debug!("Stored {} at {}", path.display(), target.display());

        let url = url::Url::from_file_path(&target)
            .map_err(|_| StorageError::InvalidUrl(format!("{} is not absolute", target.display())))?;
        Ok(url.to_string())
    }

    async fn download_file(&self, url: &str, path: &Path) -> StorageResult<()> {
        let source = url::Url::parse(url)
            .ok()
            .filter(|u| u.scheme() == "file")
            .and_then(|u| u.to_file_path().ok())
            .ok_or_else(|| StorageError::InvalidUrl(url.to_string()))?;
        if !tokio::fs::try_exists(&source).await? {
            return Err(StorageError::not_found(url));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, path).await?;
        Ok(())
    }

    fn owns_url(&self, url: &str) -> bool {
        url.starts_with("file://")
    }
}
