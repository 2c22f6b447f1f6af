use std::path::PathBuf;

/// Errors raised while turning raw job parameters into settings.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The job input does not match the parameter schema.
    #[error("{0}")]
    InvalidInput(String),

    /// The settings override file could not be read or parsed.
    #[error("Failed to load settings file {path}: {reason}")]
    SettingsFile { path: PathBuf, reason: String },

    /// The merged settings are not usable by the pipeline.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Serializing the resolved settings to disk failed.
    #[error("Internal error: {0}")]
    Internal(String),
}
