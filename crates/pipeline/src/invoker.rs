//! Single-run driver.
//!
//! [`GenerationInvoker::invoke`] runs one job on a leased pipeline. Each
//! frame callback becomes a [`ProgressEvent`] handed to a [`ProgressSink`]
//! on the same task. Sink errors and panics are logged and never reach the
//! pipeline.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

use reelsmith_core::preview::try_encode_preview;
use reelsmith_core::progress::{ProgressEvent, ProgressTracker};
use reelsmith_core::settings::ResolvedSettings;

use crate::backend::{FrameEvent, GenerationPipeline, InvocationConfig};
use crate::error::{PipelineError, ProgressError};

/// Receives progress events for a running job.
///
/// Called synchronously from inside the pipeline's frame callback, so
/// implementations must not block for long.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, job_id: &str, event: &ProgressEvent) -> Result<(), ProgressError>;
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn publish(&self, _job_id: &str, _event: &ProgressEvent) -> Result<(), ProgressError> {
        Ok(())
    }
}

/// What one successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub status: Option<String>,
    pub timestring: Option<String>,
    pub outdir: Option<PathBuf>,
    /// Frame count the pipeline reports, or the last frame it announced.
    pub frames_reached: Option<u32>,
    /// Existing local video file.
    pub video_path: PathBuf,
}

/// Runs one generation pass and translates its progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationInvoker;

impl GenerationInvoker {
    pub fn new() -> Self {
        Self
    }

    /// Run `settings` on `pipeline` to completion.
    ///
    /// Any pipeline failure, and any run that reports no existing video
    /// file, is a [`PipelineError::Generation`].
    pub async fn invoke(
        &self,
        job_id: &str,
        pipeline: &mut dyn GenerationPipeline,
        settings: &ResolvedSettings,
        sink: &dyn ProgressSink,
    ) -> Result<GenerationResult, PipelineError> {
        let tracker = ProgressTracker::start(settings.max_frames);
        let preview_opts = settings.preview;
        let config = InvocationConfig::from(settings);
        let mut last_frame: Option<u32> = None;

        tracing::info!(
            job_id,
            backend = pipeline.name(),
            timestring = %settings.timestring,
            max_frames = settings.max_frames,
            optimize = config.optimize,
            "Starting generation",
        );

        let mut on_frame = |frame: FrameEvent| {
            last_frame = Some(last_frame.map_or(frame.frame_idx, |f| f.max(frame.frame_idx)));

            let preview = frame
                .preview
                .as_ref()
                .and_then(|img| try_encode_preview(img, preview_opts));
            let event = tracker.observe(frame.frame_idx, preview);

            match catch_unwind(AssertUnwindSafe(|| sink.publish(job_id, &event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(job_id, frame_idx = frame.frame_idx, error = %e, "Progress delivery failed");
                }
                Err(_) => {
                    tracing::warn!(job_id, frame_idx = frame.frame_idx, "Progress sink panicked");
                }
            }
        };

        let output = pipeline
            .run(settings, &config, &mut on_frame)
            .await
            .map_err(|e| match e {
                PipelineError::Generation(_) => e,
                other => PipelineError::Generation(other.to_string()),
            })?;

        let video_path = output
            .video_path
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| PipelineError::Generation("pipeline produced no video path".into()))?;

        if !video_path.is_file() {
            return Err(PipelineError::Generation(format!(
                "video file does not exist: {}",
                video_path.display()
            )));
        }

        let result = GenerationResult {
            status: output.status,
            timestring: output.timestring,
            outdir: output.outdir,
            frames_reached: output.max_frames.or(last_frame),
            video_path,
        };

        tracing::info!(
            job_id,
            video = %result.video_path.display(),
            frames = ?result.frames_reached,
            "Generation finished",
        );
        Ok(result)
    }
}
