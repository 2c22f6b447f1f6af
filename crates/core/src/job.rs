//! Job request envelope and parameter schema.
//!
//! A job arrives as an opaque JSON mapping. [`JobRequest::params`]
//! extracts the parameter payload (nested under `settings` or flattened)
//! and [`JobParams::from_params`] checks it against the typed schema
//! before anything touches the filesystem or the pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use crate::error::CoreError;

/// Raw job parameters as delivered by the hosting runtime.
pub type Params = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Frame count used for progress reporting when the job omits `max_frames`.
pub const DEFAULT_MAX_FRAMES: u32 = 100;
/// Longest preview side in pixels when the job omits `preview_max_side`.
pub const DEFAULT_PREVIEW_MAX_SIDE: u32 = 512;
/// JPEG quality for preview frames when the job omits `preview_jpeg_quality`.
pub const DEFAULT_PREVIEW_JPEG_QUALITY: u8 = 85;
/// Generator optimisation mode when the job omits `optimize`.
pub const DEFAULT_OPTIMIZE: bool = true;

/// Key under which parameters may be nested in the job input.
pub const SETTINGS_KEY: &str = "settings";

fn default_max_frames() -> u32 {
    DEFAULT_MAX_FRAMES
}

fn default_preview_max_side() -> u32 {
    DEFAULT_PREVIEW_MAX_SIDE
}

fn default_preview_jpeg_quality() -> u8 {
    DEFAULT_PREVIEW_JPEG_QUALITY
}

fn default_optimize() -> bool {
    DEFAULT_OPTIMIZE
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One job as handed to the worker. Owned by a single job execution.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Runtime-assigned job identifier, used for logging and progress.
    pub id: String,
    /// The untouched `input` mapping.
    pub input: Value,
}

impl JobRequest {
    pub fn new(id: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            input,
        }
    }

    /// Extract the parameter mapping from the input.
    ///
    /// Parameters nested under `settings` take precedence; otherwise the
    /// whole input object is treated as flattened parameters.
    pub fn params(&self) -> Result<Params, CoreError> {
        let obj = self
            .input
            .as_object()
            .ok_or_else(|| CoreError::InvalidInput("Job input must be a JSON object".into()))?;

        match obj.get(SETTINGS_KEY) {
            Some(Value::Object(nested)) => {
                let ignored = ignored_top_level_keys(obj);
                if !ignored.is_empty() {
                    tracing::debug!(
                        job_id = %self.id,
                        ignored = ?ignored,
                        "Top-level keys ignored in favour of nested settings",
                    );
                }
                Ok(nested.clone())
            }
            Some(Value::Null) | None => Ok(obj.clone()),
            Some(_) => Err(CoreError::InvalidInput(
                "'settings' must be a JSON object".into(),
            )),
        }
    }
}

/// Keys beside `settings` that a nested payload shadows.
fn ignored_top_level_keys(obj: &Params) -> Vec<&str> {
    obj.keys()
        .map(String::as_str)
        .filter(|key| *key != SETTINGS_KEY)
        .collect()
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Prompts are either newline-separated text or an explicit
/// keyframe-to-prompt mapping.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Prompts {
    Text(String),
    Keyed(IndexMap<String, String>),
}

/// The recognised subset of job parameters.
///
/// Unknown keys are preserved in the raw [`Params`] and forwarded to the
/// pipeline untouched; only the fields below are type- and range-checked.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct JobParams {
    pub settings_file: Option<PathBuf>,
    pub video_init_path: Option<String>,
    pub video_mask_path: Option<String>,
    pub prompts: Option<Prompts>,
    pub keyframes: Option<String>,
    #[serde(default)]
    pub resume_from_timestring: bool,
    pub resume_timestring: Option<String>,
    #[serde(default = "default_preview_max_side")]
    #[validate(range(min = 16, max = 4096, message = "must be between 16 and 4096"))]
    pub preview_max_side: u32,
    #[serde(default = "default_preview_jpeg_quality")]
    #[validate(range(min = 1, max = 100, message = "must be between 1 and 100"))]
    pub preview_jpeg_quality: u8,
    #[serde(default = "default_optimize")]
    pub optimize: bool,
    #[serde(default = "default_max_frames")]
    #[validate(range(min = 1, max = 100000, message = "must be between 1 and 100000"))]
    pub max_frames: u32,
}

impl JobParams {
    /// Deserialize and validate the recognised parameters.
    pub fn from_params(params: &Params) -> Result<Self, CoreError> {
        let parsed: JobParams = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        parsed
            .validate()
            .map_err(|e| CoreError::InvalidInput(format_validation_errors(&e)))?;
        Ok(parsed)
    }
}

/// Flatten validator errors into a stable `field: message` list.
fn format_validation_errors(errors: &validator::ValidationErrors) -> String {
    let mut by_field = BTreeMap::new();
    for (field, errs) in errors.field_errors() {
        let messages: Vec<String> = errs
            .iter()
            .map(|e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string())
            })
            .collect();
        by_field.insert(field.to_string(), messages.join(", "));
    }
    by_field
        .into_iter()
        .map(|(field, msg)| format!("{field}: {msg}"))
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
