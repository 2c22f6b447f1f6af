//! Result publication.
//!
//! [`ResultPublisher::publish`] uploads a local video under a fresh key and
//! prefers a signed URL, falling back to the direct object location when
//! signing fails. The local file is owned by a drop guard for the whole
//! call, so it is removed on success, on upload failure, and when the
//! publishing future is dropped mid-flight.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reelsmith_core::storage::{fresh_video_key, normalize_prefix, DEFAULT_PRESIGN_EXPIRY_SECS};
use serde::Serialize;

use crate::error::PublishError;
use crate::store::ObjectStore;

/// Content type of every uploaded artifact.
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// How the issued URL grants access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlAccess {
    /// Signed URL valid for `expires_in` seconds.
    Signed { expires_in: u64 },
    /// Unsigned location; reading it needs credentials.
    Direct,
}

/// A durably stored result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedArtifact {
    pub url: String,
    pub key: String,
    pub bucket: String,
    pub access: UrlAccess,
}

impl PublishedArtifact {
    pub fn requires_auth(&self) -> bool {
        self.access == UrlAccess::Direct
    }
}

/// Uploads finished videos and issues their URLs.
#[derive(Clone)]
pub struct ResultPublisher {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
    expiry: Duration,
}

impl std::fmt::Debug for ResultPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultPublisher")
            .field("bucket", &self.store.bucket())
            .field("prefix", &self.prefix)
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl ResultPublisher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            prefix: None,
            expiry: Duration::from_secs(DEFAULT_PRESIGN_EXPIRY_SECS),
        }
    }

    /// Directory prepended to every key. Blank prefixes are ignored.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = normalize_prefix(prefix);
        self
    }

    /// Validity of signed URLs.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Upload `local` and return its durable reference.
    ///
    /// `local` no longer exists once this returns, whatever the outcome.
    pub async fn publish(&self, local: &Path) -> Result<PublishedArtifact, PublishError> {
        let artifact = LocalArtifact::new(local);

        if !artifact.path().is_file() {
            return Err(PublishError::MissingArtifact(local.display().to_string()));
        }

        let key = fresh_video_key(self.prefix.as_deref());
        let bucket = self.store.bucket().to_string();

        if let Err(source) = self
            .store
            .put_file(&key, artifact.path(), VIDEO_CONTENT_TYPE)
            .await
        {
            tracing::error!(%bucket, %key, error = %source, "Upload failed");
            return Err(PublishError::Upload { key, source });
        }
        tracing::info!(%bucket, %key, "Uploaded result");

        let (url, access) = match self.store.presign_get(&key, self.expiry).await {
            Ok(url) => (
                url,
                UrlAccess::Signed {
                    expires_in: self.expiry.as_secs(),
                },
            ),
            Err(e) => {
                tracing::warn!(%key, error = %e, "URL signing failed, returning direct URL");
                (self.store.object_url(&key), UrlAccess::Direct)
            }
        };

        Ok(PublishedArtifact {
            url,
            key,
            bucket,
            access,
        })
    }
}

/// Removes its file when dropped.
#[derive(Debug)]
struct LocalArtifact {
    path: PathBuf,
}

impl LocalArtifact {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LocalArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed local artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove local artifact")
            }
        }
    }
}
