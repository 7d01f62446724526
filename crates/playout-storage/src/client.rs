//! S3-compatible storage client.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::MediaStore;

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint for S3-compatible services; `None` uses AWS
    pub endpoint_url: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Bucket rendered media is written to
    pub bucket_name: String,
    pub region: String,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("S3_ENDPOINT_URL").ok().filter(|s| !s.is_empty()),
            access_key_id: std::env::var("S3_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("S3_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("S3_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("S3_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("S3_BUCKET_NAME not set"))?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        })
    }
}

/// Storage client addressing objects as `s3://bucket/key`.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "playout",
        );

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket_name,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(S3Config::from_env()?))
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key.trim_start_matches('/'))
    }
}

/// Split `s3://bucket/key` into its parts.
pub fn parse_s3_url(raw: &str) -> StorageResult<(String, String)> {
    let url = url::Url::parse(raw).map_err(|e| StorageError::InvalidUrl(format!("{raw}: {e}")))?;
    if url.scheme() != "s3" {
        return Err(StorageError::InvalidUrl(format!("{raw}: expected s3:// scheme")));
    }
    let bucket = url
        .host_str()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| StorageError::InvalidUrl(format!("{raw}: missing bucket")))?;
    let key = url.path().trim_start_matches('/');
    if key.is_empty() {
        return Err(StorageError::InvalidUrl(format!("{raw}: missing key")));
    }
    Ok((bucket.to_string(), key.to_string()))
}

#[async_trait]
impl MediaStore for S3Storage {
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<String> {
        debug!("Uploading {} to {}", path.display(), key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to {}", path.display(), key);
        Ok(self.object_url(key))
    }

    async fn download_file(&self, url: &str, path: &Path) -> StorageResult<()> {
        let (bucket, key) = parse_s3_url(url)?;
        debug!("Downloading {} to {}", url, path.display());

        let response = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::not_found(url)
                } else {
                    StorageError::download_failed(e.to_string())
                }
            })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut body = response.body;
        let mut file = tokio::fs::File::create(path).await?;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        info!("Downloaded {} to {}", url, path.display());
        Ok(())
    }

    fn owns_url(&self, url: &str) -> bool {
        parse_s3_url(url).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_url() {
        let (bucket, key) = parse_s3_url("s3://media/uploads/talk-1.mov").unwrap();
        assert_eq!(bucket, "media");
        assert_eq!(key, "uploads/talk-1.mov");

        assert!(parse_s3_url("https://media/x.mov").is_err());
        assert!(parse_s3_url("s3://media/").is_err());
        assert!(parse_s3_url("nonsense").is_err());
    }

    #[test]
    fn test_object_url() {
        let storage = S3Storage::new(S3Config {
            endpoint_url: Some("http://localhost:9000".into()),
            access_key_id: "key".into(),
            secret_access_key: "secret".into(),
            bucket_name: "broadcast".into(),
            region: "us-east-1".into(),
        });
        assert_eq!(storage.object_url("/renders/x.mp4"), "s3://broadcast/renders/x.mp4");
        assert!(storage.owns_url("s3://other/renders/x.mp4"));
        assert!(!storage.owns_url("https://cdn.example.com/x.mp4"));
    }
}
