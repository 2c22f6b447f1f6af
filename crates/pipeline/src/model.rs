//! Model file resolution.
//!
//! [`ModelLocator`] prefers a pre-baked or volume-mounted model file found
//! in one of an ordered list of directories. Only when none is present
//! does it fetch the model from the remote registry, caching the download
//! under `cache_dir` so later reloads in the same container skip the
//! network.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

/// Where the weights for a pipeline come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A file found in one of the local search paths.
    Local(PathBuf),
    /// A file fetched from the registry (possibly from an earlier run's cache).
    Downloaded { model_id: String, path: PathBuf },
    /// The backend needs no external weights.
    Bundled,
}

impl ModelSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Local(path) | Self::Downloaded { path, .. } => Some(path),
            Self::Bundled => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelLocateError {
    #[error("Registry request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Registry returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Checksum mismatch for {model_id}: expected {expected}, got {actual}")]
    Checksum {
        model_id: String,
        expected: String,
        actual: String,
    },

    #[error("Model I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No model available: {0}")]
    Unavailable(String),
}

/// Produces the [`ModelSource`] a loader should build from.
#[async_trait]
pub trait ModelResolver: Send + Sync {
    async fn resolve(&self) -> Result<ModelSource, ModelLocateError>;
}

/// Resolver for backends without external weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledModel;

#[async_trait]
impl ModelResolver for BundledModel {
    async fn resolve(&self) -> Result<ModelSource, ModelLocateError> {
        Ok(ModelSource::Bundled)
    }
}

// ---------------------------------------------------------------------------
// ModelLocator
// ---------------------------------------------------------------------------

/// Local-first model resolution with registry fallback.
#[derive(Debug, Clone)]
pub struct ModelLocator {
    search_paths: Vec<PathBuf>,
    filename: String,
    model_id: String,
    fallback_model_id: Option<String>,
    registry_url: String,
    cache_dir: PathBuf,
    sha256: Option<String>,
    client: reqwest::Client,
}

impl ModelLocator {
    /// * `search_paths` - directories checked in order for `filename`.
    /// * `model_id`     - registry identifier, e.g. `org/name`.
    /// * `registry_url` - registry base URL.
    /// * `cache_dir`    - download cache root.
    pub fn new(
        search_paths: Vec<PathBuf>,
        filename: impl Into<String>,
        model_id: impl Into<String>,
        registry_url: impl Into<String>,
        cache_dir: PathBuf,
    ) -> Self {
        Self {
            search_paths,
            filename: filename.into(),
            model_id: model_id.into(),
            fallback_model_id: None,
            registry_url: registry_url.into(),
            cache_dir,
            sha256: None,
            client: reqwest::Client::new(),
        }
    }

    /// Identifier tried when the primary download fails.
    pub fn with_fallback(mut self, model_id: Option<String>) -> Self {
        self.fallback_model_id = model_id;
        self
    }

    /// Expected hex SHA-256 of downloaded files.
    pub fn with_checksum(mut self, sha256: Option<String>) -> Self {
        self.sha256 = sha256.map(|s| s.to_ascii_lowercase());
        self
    }

    /// First search directory that contains the model file. An entry that
    /// is itself a file matches directly.
    pub fn find_local(&self) -> Option<PathBuf> {
        self.search_paths.iter().find_map(|entry| {
            if entry.is_file() {
                return Some(entry.clone());
            }
            let candidate = entry.join(&self.filename);
            candidate.is_file().then_some(candidate)
        })
    }

    /// Cache location for a registry identifier.
    pub fn cache_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir
            .join(model_id.replace(['/', '\\'], "--"))
            .join(&self.filename)
    }

    fn registry_file_url(&self, model_id: &str) -> String {
        format!(
            "{}/{model_id}/resolve/main/{}",
            self.registry_url.trim_end_matches('/'),
            self.filename
        )
    }

    /// Cached copy or fresh download of `model_id`.
    async fn fetch(&self, model_id: &str) -> Result<PathBuf, ModelLocateError> {
        let target = self.cache_path(model_id);
        if target.is_file() {
            tracing::info!(model_id, path = %target.display(), "Using cached model download");
            return Ok(target);
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = self.registry_file_url(model_id);
        tracing::info!(model_id, %url, "Downloading model from registry");

        let mut response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ModelLocateError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let partial = target.with_extension("partial");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut hasher = Sha256::new();
        let mut bytes: u64 = 0;

        let written: Result<(), ModelLocateError> = async {
            while let Some(chunk) = response.chunk().await? {
                hasher.update(&chunk);
                file.write_all(&chunk).await?;
                bytes += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        let actual = format!("{:x}", hasher.finalize());
        if let Some(expected) = &self.sha256 {
            if *expected != actual {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(ModelLocateError::Checksum {
                    model_id: model_id.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        tokio::fs::rename(&partial, &target).await?;
        tracing::info!(model_id, bytes, sha256 = %actual, "Model download complete");
        Ok(target)
    }
}

#[async_trait]
impl ModelResolver for ModelLocator {
    async fn resolve(&self) -> Result<ModelSource, ModelLocateError> {
        if let Some(path) = self.find_local() {
            tracing::info!(path = %path.display(), "Using local model file");
            return Ok(ModelSource::Local(path));
        }

        let candidates = std::iter::once(self.model_id.as_str())
            .chain(self.fallback_model_id.as_deref());

        let mut failures = Vec::new();
        for model_id in candidates {
            match self.fetch(model_id).await {
                Ok(path) => {
                    return Ok(ModelSource::Downloaded {
                        model_id: model_id.to_string(),
                        path,
                    })
                }
                Err(e) => {
                    tracing::warn!(model_id, error = %e, "Model download failed");
                    failures.push(format!("{model_id}: {e}"));
                }
            }
        }

        Err(ModelLocateError::Unavailable(failures.join("; ")))
    }
}
