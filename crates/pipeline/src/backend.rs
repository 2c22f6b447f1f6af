//! The pipeline capability interface.
//!
//! [`GenerationPipeline`] is what the manager and invoker need from a
//! loaded model: an explicit health check, the two generator-level
//! recovery hooks, and a run entry point that receives its per-job flags
//! as an argument rather than through shared mutable configuration.

use std::path::PathBuf;

use async_trait::async_trait;
use image::DynamicImage;
use reelsmith_core::settings::ResolvedSettings;
use serde::Deserialize;

use crate::error::PipelineError;
use crate::model::ModelSource;

/// Result of a pipeline's structural self-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy { reason: String },
}

impl HealthStatus {
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self::Unhealthy {
            reason: reason.into(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Healthy iff every `required` capability is in `advertised`.
    pub fn from_capabilities(advertised: &[String], required: &[&str]) -> Self {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|cap| !advertised.iter().any(|a| a == cap))
            .collect();
        if missing.is_empty() {
            Self::Healthy
        } else {
            Self::unhealthy(format!("missing capabilities: {}", missing.join(", ")))
        }
    }
}

/// Per-invocation generator flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationConfig {
    pub optimize: bool,
}

impl From<&ResolvedSettings> for InvocationConfig {
    fn from(settings: &ResolvedSettings) -> Self {
        Self {
            optimize: settings.optimize,
        }
    }
}

/// One frame reported by a running pipeline.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    /// Index of the frame just produced.
    pub frame_idx: u32,
    /// Raw preview of the frame, if the backend supplied one.
    pub preview: Option<DynamicImage>,
}

/// What a finished run reports back. Every field is optional; the
/// invoker decides what is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AnimationOutput {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestring: Option<String>,
    #[serde(default)]
    pub outdir: Option<PathBuf>,
    #[serde(default)]
    pub max_frames: Option<u32>,
    #[serde(default)]
    pub video_path: Option<PathBuf>,
}

/// A loaded generation pipeline.
///
/// Implementations are driven through `&mut self` only: the manager's
/// lease guarantees a single caller at a time.
#[async_trait]
pub trait GenerationPipeline: Send {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Cheap structural check run before every job.
    fn health_check(&mut self) -> HealthStatus;

    /// Tier 1: reset the generator in place.
    async fn reset_generator(&mut self) -> Result<(), PipelineError> {
        Err(PipelineError::ResetUnsupported)
    }

    /// Tier 2: rebuild only the generator from its recorded construction
    /// arguments, keeping the loaded model.
    async fn rebuild_generator(&mut self) -> Result<(), PipelineError>;

    /// Run one generation to completion, calling `on_frame` synchronously
    /// for each produced frame.
    async fn run(
        &mut self,
        settings: &ResolvedSettings,
        config: &InvocationConfig,
        on_frame: &mut (dyn FnMut(FrameEvent) + Send),
    ) -> Result<AnimationOutput, PipelineError>;

    /// Release backend resources before the pipeline is discarded.
    async fn shutdown(&mut self) {}
}

/// Constructs pipelines from a resolved model.
#[async_trait]
pub trait PipelineLoader: Send + Sync {
    async fn load(&self, model: &ModelSource) -> Result<Box<dyn GenerationPipeline>, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_all_present() {
        let advertised = vec!["render_animation".to_string(), "optimize".to_string()];
        assert!(HealthStatus::from_capabilities(&advertised, &["render_animation"]).is_healthy());
    }

    #[test]
    fn capabilities_missing_are_named() {
        let advertised = vec!["render_animation".to_string()];
        let status = HealthStatus::from_capabilities(&advertised, &["render_animation", "optimize", "reset"]);
        assert_eq!(
            status,
            HealthStatus::unhealthy("missing capabilities: optimize, reset")
        );
    }

    #[test]
    fn animation_output_tolerates_missing_fields() {
        let out: AnimationOutput = serde_json::from_str(r#"{"video_path": "/out/a.mp4"}"#).unwrap();
        assert_eq!(out.video_path, Some(PathBuf::from("/out/a.mp4")));
        assert!(out.status.is_none());
        assert!(out.max_frames.is_none());
    }
}
