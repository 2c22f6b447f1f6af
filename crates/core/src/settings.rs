//! Settings resolution: raw job parameters to the canonical payload the
//! pipeline consumes.
//!
//! [`SettingsResolver::resolve`] merges an optional settings file over the
//! request parameters (file values win), normalises prompt encodings into
//! an ordered `animation_prompts` mapping, and fixes the run's
//! `timestring`. [`ResolvedSettings::persist`] then writes the exact payload
//! to a temporary file whose path is recorded inside the payload itself.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use tempfile::TempPath;

use crate::error::CoreError;
use crate::job::{JobParams, Params, Prompts};
use crate::preview::PreviewOptions;

/// Keyframe used when prompts are given as text without keyframes.
pub const DEFAULT_KEYFRAME: &str = "0";

/// `strftime` layout of freshly generated timestrings (whole seconds).
pub const TIMESTRING_FORMAT: &str = "%Y%m%d%H%M%S";

/// Upper bound on a reused timestring's length.
const MAX_TIMESTRING_LEN: usize = 64;

/// Keys consumed by normalisation and not forwarded verbatim.
const CONSUMED_KEYS: &[&str] = &["prompts", "keyframes"];

// ---------------------------------------------------------------------------
// Resolved settings
// ---------------------------------------------------------------------------

/// Canonical settings for exactly one job.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    /// Complete payload handed to the pipeline, including the canonical
    /// `timestring` key and, when the job names prompts, `animation_prompts`.
    pub values: Params,
    /// Keyframe -> prompt, in keyframe order. Empty when the job leaves the
    /// pipeline's default prompts in place.
    pub animation_prompts: IndexMap<String, String>,
    /// Run identifier naming the output directory.
    pub timestring: String,
    /// Frame count progress is measured against.
    pub max_frames: u32,
    /// Generator optimisation mode for this job.
    pub optimize: bool,
    /// Preview downsampling/encoding parameters.
    pub preview: PreviewOptions,
    /// Override file the parameters were merged from, if any.
    pub source_file: Option<PathBuf>,
    /// Serialized snapshot of `values`, set by [`persist`](Self::persist).
    pub settings_file: Option<PathBuf>,
}

impl ResolvedSettings {
    /// Read a string-valued parameter.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Replace a string-valued parameter.
    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.values
            .insert(key.to_string(), Value::String(value.into()));
    }

    /// Serialize the payload into a fresh `.json` file under `dir`.
    ///
    /// The file path is written into the payload under `settings_file`
    /// before serialization, so the snapshot names itself. The returned
    /// [`TempPath`] deletes the file when dropped.
    pub fn persist(&mut self, dir: &Path) -> Result<TempPath, CoreError> {
        let mut file = tempfile::Builder::new()
            .prefix("settings-")
            .suffix(".json")
            .tempfile_in(dir)
            .map_err(|e| CoreError::Internal(format!("Failed to create settings file: {e}")))?;

        let path = file.path().to_path_buf();
        self.values.insert(
            "settings_file".to_string(),
            Value::String(path.to_string_lossy().into_owned()),
        );

        serde_json::to_writer_pretty(file.as_file_mut(), &self.values)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize settings: {e}")))?;
        file.as_file_mut()
            .flush()
            .map_err(|e| CoreError::Internal(format!("Failed to write settings file: {e}")))?;

        self.settings_file = Some(path);
        Ok(file.into_temp_path())
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Turns raw parameters into [`ResolvedSettings`].
#[derive(Debug, Clone, Copy)]
pub struct SettingsResolver {
    now: fn() -> DateTime<Utc>,
}

impl Default for SettingsResolver {
    fn default() -> Self {
        Self { now: Utc::now }
    }
}

impl SettingsResolver {
    /// Resolver with an injected clock.
    pub fn with_clock(now: fn() -> DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Resolve raw parameters into canonical settings.
    pub fn resolve(&self, mut params: Params) -> Result<ResolvedSettings, CoreError> {
        let requested = JobParams::from_params(&params)?;

        let source_file = requested.settings_file.clone();
        if let Some(path) = &source_file {
            let overrides = load_settings_file(path)?;
            for (key, value) in overrides {
                params.insert(key, value);
            }
        }

        // File values may change any recognised field, so re-check the merge.
        let job = if source_file.is_some() {
            JobParams::from_params(&params).map_err(|e| match e {
                CoreError::InvalidInput(msg) => CoreError::InvalidSettings(msg),
                other => other,
            })?
        } else {
            requested
        };

        let animation_prompts = match job.prompts.as_ref() {
            Some(prompts) => Some(normalize_prompts(prompts, job.keyframes.as_deref())),
            None => existing_animation_prompts(&params)?,
        };
        if animation_prompts.as_ref().is_some_and(|p| p.is_empty()) {
            return Err(CoreError::InvalidSettings(
                "At least one prompt is required".into(),
            ));
        }

        let timestring = resolve_timestring(
            job.resume_from_timestring,
            job.resume_timestring.as_deref(),
            (self.now)(),
        )?;

        for key in CONSUMED_KEYS {
            params.remove(*key);
        }
        if let Some(prompts) = &animation_prompts {
            params.insert(
                "animation_prompts".to_string(),
                serde_json::to_value(prompts).map_err(|e| CoreError::Internal(e.to_string()))?,
            );
        }
        params.insert("timestring".to_string(), Value::String(timestring.clone()));
        params.insert("max_frames".to_string(), Value::from(job.max_frames));
        params.insert("optimize".to_string(), Value::Bool(job.optimize));

        Ok(ResolvedSettings {
            values: params,
            animation_prompts: animation_prompts.unwrap_or_default(),
            timestring,
            max_frames: job.max_frames,
            optimize: job.optimize,
            preview: PreviewOptions {
                max_side: job.preview_max_side,
                jpeg_quality: job.preview_jpeg_quality,
            },
            source_file,
            settings_file: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load a JSON settings file whose top level must be an object.
pub fn load_settings_file(path: &Path) -> Result<Params, CoreError> {
    let settings_err = |reason: String| CoreError::SettingsFile {
        path: path.to_path_buf(),
        reason,
    };

    let text = std::fs::read_to_string(path).map_err(|e| settings_err(e.to_string()))?;
    match serde_json::from_str::<Value>(&text).map_err(|e| settings_err(e.to_string()))? {
        Value::Object(map) => Ok(map),
        _ => Err(settings_err("top level must be a JSON object".into())),
    }
}

/// Build the keyframe -> prompt mapping.
///
/// Text prompts are split into non-empty lines and paired positionally
/// with the non-empty lines of `keyframes` (or the single keyframe `"0"`).
/// Pairing stops at the shorter sequence. A later duplicate keyframe
/// replaces the earlier prompt but keeps its position.
pub fn normalize_prompts(prompts: &Prompts, keyframes: Option<&str>) -> IndexMap<String, String> {
    match prompts {
        Prompts::Keyed(map) => map.clone(),
        Prompts::Text(text) => {
            let keys: Vec<&str> = keyframes
                .map(non_empty_lines)
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| vec![DEFAULT_KEYFRAME]);

            keys.into_iter()
                .zip(non_empty_lines(text))
                .map(|(k, p)| (k.to_string(), p.to_string()))
                .collect()
        }
    }
}

fn non_empty_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Accept a settings-file style `animation_prompts` mapping when no
/// `prompts` parameter was given. `None` when neither is present.
fn existing_animation_prompts(
    params: &Params,
) -> Result<Option<IndexMap<String, String>>, CoreError> {
    match params.get("animation_prompts") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
            CoreError::InvalidSettings(format!(
                "animation_prompts must map keyframes to prompt strings: {e}"
            ))
        }),
    }
}

/// Pick the run identifier.
///
/// A resume request with a non-empty timestring reuses it verbatim;
/// everything else gets a fresh whole-second UTC stamp.
pub fn resolve_timestring(
    resume: bool,
    requested: Option<&str>,
    now: DateTime<Utc>,
) -> Result<String, CoreError> {
    match requested.filter(|ts| !ts.is_empty()) {
        Some(ts) if resume => {
            if is_path_safe_timestring(ts) {
                Ok(ts.to_string())
            } else {
                Err(CoreError::InvalidSettings(format!(
                    "resume_timestring '{ts}' may only contain letters, digits, '-' or '_'"
                )))
            }
        }
        _ => Ok(now.format(TIMESTRING_FORMAT).to_string()),
    }
}

/// A timestring is safe to use as a single path component.
pub fn is_path_safe_timestring(ts: &str) -> bool {
    !ts.is_empty()
        && ts.len() <= MAX_TIMESTRING_LEN
        && ts
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
