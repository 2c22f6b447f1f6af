//! Job envelope and flat job output.

use reelsmith_cloud::{PublishedArtifact, UrlAccess};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::JobError;

/// Body of `POST /runsync`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    /// Caller-chosen job id; a fresh UUID is used when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// Outcome of one job. Always produced, whatever happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub status: JobStatus,
    pub output: Value,
}

impl JobResponse {
    pub fn completed(id: impl Into<String>, artifact: &PublishedArtifact) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Completed,
            output: success_output(artifact),
        }
    }

    pub fn failed(id: impl Into<String>, err: &JobError) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Failed,
            output: err.to_output(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// `{video, s3_key, bucket, expires_in}` for signed URLs,
/// `{video, requires_auth: true}` for the direct fallback.
pub fn success_output(artifact: &PublishedArtifact) -> Value {
    match artifact.access {
        UrlAccess::Signed { expires_in } => json!({
            "video": artifact.url,
            "s3_key": artifact.key,
            "bucket": artifact.bucket,
            "expires_in": expires_in,
        }),
        UrlAccess::Direct => json!({
            "video": artifact.url,
            "requires_auth": true,
        }),
    }
}
