use reelsmith_cloud::PublishError;
use reelsmith_core::error::CoreError;
use reelsmith_pipeline::PipelineError;
use serde_json::{json, Value};

/// Why a job failed, in the form reported to the caller.
///
/// Each variant maps to a stable [`kind`](JobError::kind) string that
/// becomes the `error` field of the job output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The input does not match the parameter schema.
    #[error("{0}")]
    InvalidInput(String),

    /// The settings override file was unreadable or malformed, or the
    /// settings snapshot could not be written.
    #[error("{0}")]
    SettingsFile(String),

    /// The merged settings are unusable.
    #[error("{0}")]
    InvalidSettings(String),

    /// No pipeline could be loaded.
    #[error("{0}")]
    ModelLoad(String),

    /// Every recovery tier failed.
    #[error("{0}")]
    PipelineUnrecoverable(String),

    /// The pipeline failed or produced no video.
    #[error("{0}")]
    Generation(String),

    /// The video could not be stored.
    #[error("{0}")]
    Upload(String),
}

impl JobError {
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::InvalidInput(_) => "InvalidInput",
            JobError::SettingsFile(_) => "SettingsFileError",
            JobError::InvalidSettings(_) => "InvalidSettings",
            JobError::ModelLoad(_) => "ModelLoadFailure",
            JobError::PipelineUnrecoverable(_) => "PipelineUnrecoverable",
            JobError::Generation(_) => "GenerationError",
            JobError::Upload(_) => "UploadError",
        }
    }

    /// Flat `{ "error": <kind>, "message": <diagnostic> }` output.
    pub fn to_output(&self) -> Value {
        json!({
            "error": self.kind(),
            "message": self.to_string(),
        })
    }
}

impl From<CoreError> for JobError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput(msg) => JobError::InvalidInput(msg),
            e @ CoreError::SettingsFile { .. } => JobError::SettingsFile(e.to_string()),
            CoreError::InvalidSettings(msg) => JobError::InvalidSettings(msg),
            CoreError::Internal(msg) => JobError::SettingsFile(msg),
        }
    }
}

impl From<PipelineError> for JobError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::ModelLoad(msg) => JobError::ModelLoad(msg),
            PipelineError::Unrecoverable(msg) => JobError::PipelineUnrecoverable(msg),
            PipelineError::Generation(msg) => JobError::Generation(msg),
            other => JobError::Generation(other.to_string()),
        }
    }
}

impl From<PublishError> for JobError {
    fn from(err: PublishError) -> Self {
        JobError::Upload(err.to_string())
    }
}
