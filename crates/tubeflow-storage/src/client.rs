//! S3-compatible object storage client.

use std::path::Path;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::SdkConfig;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint (MinIO, R2, ...). `None` uses AWS.
    pub endpoint_url: Option<String>,
    /// Static credentials. When absent the default provider chain is used.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: String,
    /// Bucket for relative-path destinations
    pub default_bucket: Option<String>,
    /// Key prefix for relative-path destinations
    pub default_prefix: String,
    /// Path-style addressing, required by most non-AWS endpoints
    pub force_path_style: bool,
    /// Parallel uploads per persisted directory
    pub upload_concurrency: usize,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            region: "us-east-1".to_string(),
            default_bucket: None,
            default_prefix: String::new(),
            force_path_style: false,
            upload_concurrency: 4,
        }
    }
}

impl S3Config {
    /// Create config from environment variables.
    ///
    /// Returns `None` when no S3 settings are present at all.
    pub fn from_env() -> Option<Self> {
        let endpoint_url = std::env::var("S3_ENDPOINT_URL").ok();
        let default_bucket = std::env::var("S3_BUCKET").ok();
        if endpoint_url.is_none() && default_bucket.is_none() {
            return None;
        }

        Some(Self {
            force_path_style: std::env::var("S3_FORCE_PATH_STYLE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(endpoint_url.is_some()),
            endpoint_url,
            access_key_id: std::env::var("S3_ACCESS_KEY_ID").ok(),
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY").ok(),
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            default_bucket,
            default_prefix: std::env::var("S3_PREFIX").unwrap_or_default(),
            upload_concurrency: std::env::var("S3_UPLOAD_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(4),
        })
    }
}

/// Thin wrapper over the AWS SDK client.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
}

impl S3Client {
    /// Create a new client from configuration.
    pub async fn new(config: &S3Config) -> StorageResult<Self> {
        let base: SdkConfig = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = Builder::from(&base).force_path_style(config.force_path_style);

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        match (&config.access_key_id, &config.secret_access_key) {
            (Some(key), Some(secret)) => {
                builder = builder
                    .credentials_provider(Credentials::new(key, secret, None, None, "tubeflow"));
            }
            (None, None) => {}
            _ => {
                return Err(StorageError::config_error(
                    "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together",
                ))
            }
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }

    /// Upload a file.
    pub async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: impl AsRef<Path>,
        content_type: &str,
    ) -> StorageResult<()> {
        let path = path.as_ref();
        debug!(bucket = %bucket, key = %key, "Uploading {}", path.display());

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(key, e.to_string()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(key, e.to_string()))?;

        Ok(())
    }
}
