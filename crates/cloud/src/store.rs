//! Object storage backends.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use reelsmith_core::storage::direct_object_url;

use crate::error::StoreError;

/// Minimal object storage operations needed to publish results.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket objects are written to.
    fn bucket(&self) -> &str;

    /// Upload the file at `path` under `key`.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<(), StoreError>;

    /// Time-limited download URL for `key`.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StoreError>;

    /// Unsigned location of `key`; may require authentication to read.
    fn object_url(&self, key: &str) -> String;
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone)]
pub struct S3Config {
    pub endpoint_url: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint_url", &self.endpoint_url)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// [`ObjectStore`] over `aws-sdk-s3` with path-style addressing and static
/// credentials.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    endpoint_url: String,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn connect(config: S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "reelsmith-static",
        );

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint_url.clone())
            .credentials_provider(credentials)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        tracing::info!(
            endpoint = %config.endpoint_url,
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store configured",
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            endpoint_url: config.endpoint_url,
            bucket: config.bucket,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<(), StoreError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StoreError::Read(format!("{}: {e}", path.display())))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Upload(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StoreError> {
        let presigning =
            PresigningConfig::expires_in(expires_in).map_err(|e| StoreError::Presign(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StoreError::Presign(DisplayErrorContext(&e).to_string()))?;

        Ok(request.uri().to_string())
    }

    fn object_url(&self, key: &str) -> String {
        direct_object_url(&self.endpoint_url, &self.bucket, key)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// [`ObjectStore`] holding objects in process memory.
#[derive(Debug)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: bool,
    presign: bool,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(HashMap::new()),
            fail_uploads: false,
            presign: true,
        }
    }

    /// Reject every upload.
    pub fn failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    /// Refuse to sign URLs.
    pub fn without_presign(mut self) -> Self {
        self.presign = false;
        self
    }

    /// Stored bytes for `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    /// Every stored key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_file(&self, key: &str, path: &Path, _content_type: &str) -> Result<(), StoreError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::Read(format!("{}: {e}", path.display())))?;
        if self.fail_uploads {
            return Err(StoreError::Upload("memory store rejects uploads".into()));
        }
        self.objects
            .lock()
            .map_err(|_| StoreError::Upload("memory store lock poisoned".into()))?
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StoreError> {
        if !self.presign {
            return Err(StoreError::PresignUnsupported);
        }
        Ok(format!(
            "{}?expires_in={}",
            self.object_url(key),
            expires_in.as_secs()
        ))
    }

    fn object_url(&self, key: &str) -> String {
        format!("memory://{}/{key}", self.bucket)
    }
}
