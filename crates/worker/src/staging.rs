//! Best-effort staging of remote initialization and mask assets.
//!
//! [`AssetStager::stage`] downloads every asset field holding an `http(s)`
//! locator into the work directory and rewrites the field to the local
//! path. A failed download is logged and leaves the field unchanged; the
//! pipeline then reports the unusable reference itself.

use std::path::PathBuf;
use std::time::Duration;

use reelsmith_core::assets::{is_remote_locator, locator_extension, ASSET_FIELDS};
use reelsmith_core::settings::ResolvedSettings;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

/// HTTP timeout for a single asset download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Asset request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Asset server returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Asset I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Local copies of staged assets. Dropping this deletes them.
#[derive(Debug, Default)]
pub struct StagedAssets {
    files: Vec<TempPath>,
}

impl StagedAssets {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Downloads remote asset references into the work directory.
#[derive(Debug, Clone)]
pub struct AssetStager {
    client: reqwest::Client,
    work_dir: PathBuf,
}

impl AssetStager {
    pub fn new(work_dir: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let client = reqwest::Client::builder().timeout(DOWNLOAD_TIMEOUT).build()?;
        Ok(Self {
            client,
            work_dir: work_dir.into(),
        })
    }

    /// Stage every remote asset field of `settings` in place.
    pub async fn stage(&self, job_id: &str, settings: &mut ResolvedSettings) -> StagedAssets {
        let mut staged = StagedAssets::default();

        for &field in ASSET_FIELDS {
            let Some(locator) = settings.get_str(field).map(str::to_owned) else {
                continue;
            };
            if !is_remote_locator(&locator) {
                continue;
            }

            match self.download(&locator).await {
                Ok(local) => {
                    tracing::info!(job_id, field, url = %locator, path = %local.display(), "Staged remote asset");
                    settings.set_str(field, local.to_string_lossy());
                    staged.files.push(local);
                }
                Err(e) => {
                    tracing::warn!(job_id, field, url = %locator, error = %e, "Asset download failed, keeping original reference");
                }
            }
        }

        staged
    }

    /// Download `url` into a fresh file under the work directory.
    pub async fn download(&self, url: &str) -> Result<TempPath, StagingError> {
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(StagingError::HttpStatus(response.status().as_u16()));
        }

        let suffix = locator_extension(url).unwrap_or_default();
        let target = tempfile::Builder::new()
            .prefix("asset-")
            .suffix(&suffix)
            .tempfile_in(&self.work_dir)?
            .into_temp_path();

        let mut file = tokio::fs::File::create(&target).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(target)
    }
}
