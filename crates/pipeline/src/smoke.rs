//! Model-free pipeline for deployment smoke tests.
//!
//! Renders `max_frames` solid frames of random colour and pipes them as raw
//! RGB into `ffmpeg`, producing `<outdir>/<timestring>.mp4`. Every frame is
//! also reported as its own preview.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use rand::Rng;
use reelsmith_core::settings::ResolvedSettings;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::backend::{
    AnimationOutput, FrameEvent, GenerationPipeline, HealthStatus, InvocationConfig,
    PipelineLoader,
};
use crate::error::PipelineError;
use crate::model::ModelSource;

pub const DEFAULT_FRAME_SIZE: u32 = 512;
pub const DEFAULT_FPS: u32 = 24;

#[derive(Debug, Clone)]
pub struct SmokePipeline {
    ffmpeg: PathBuf,
    output_root: PathBuf,
    frame_size: u32,
    fps: u32,
    interrupted: bool,
}

impl SmokePipeline {
    pub fn new(ffmpeg: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            output_root: output_root.into(),
            frame_size: DEFAULT_FRAME_SIZE,
            fps: DEFAULT_FPS,
            interrupted: false,
        }
    }

    pub fn with_frame_size(mut self, frame_size: u32) -> Self {
        self.frame_size = frame_size.max(2);
        self
    }

    fn outdir_for(&self, settings: &ResolvedSettings) -> PathBuf {
        settings
            .get_str("outdir")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.output_root.join(&settings.timestring))
    }
}

fn random_colour() -> [u8; 3] {
    rand::rng().random()
}

#[async_trait]
impl GenerationPipeline for SmokePipeline {
    fn name(&self) -> &str {
        "smoke"
    }

    fn health_check(&mut self) -> HealthStatus {
        if self.interrupted {
            HealthStatus::unhealthy("previous run did not complete")
        } else {
            HealthStatus::Healthy
        }
    }

    async fn reset_generator(&mut self) -> Result<(), PipelineError> {
        self.interrupted = false;
        Ok(())
    }

    async fn rebuild_generator(&mut self) -> Result<(), PipelineError> {
        self.interrupted = false;
        Ok(())
    }

    async fn run(
        &mut self,
        settings: &ResolvedSettings,
        config: &InvocationConfig,
        on_frame: &mut (dyn FnMut(FrameEvent) + Send),
    ) -> Result<AnimationOutput, PipelineError> {
        let outdir = self.outdir_for(settings);
        tokio::fs::create_dir_all(&outdir).await?;
        let video_path = outdir.join(format!("{}.mp4", settings.timestring));

        let size = self.frame_size;
        let quality = if config.optimize { "5" } else { "2" };
        let dimensions = format!("{size}x{size}");
        let fps = self.fps.to_string();

        let mut child = Command::new(&self.ffmpeg)
            .args(["-y", "-loglevel", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", dimensions.as_str(), "-r", fps.as_str()])
            .args(["-i", "-", "-c:v", "mpeg4", "-q:v", quality, "-pix_fmt", "yuv420p"])
            .arg(&video_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::Generation(format!("failed to start ffmpeg: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::Protocol("ffmpeg stdin unavailable".into()))?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut s) = stderr {
                let _ = s.read_to_string(&mut buf).await;
            }
            buf
        });

        self.interrupted = true;
        for frame_idx in 1..=settings.max_frames {
            let colour = random_colour();
            let frame = RgbImage::from_pixel(size, size, Rgb(colour));
            stdin.write_all(frame.as_raw()).await?;
            on_frame(FrameEvent {
                frame_idx,
                preview: Some(DynamicImage::ImageRgb8(frame)),
            });
        }
        stdin.flush().await?;
        drop(stdin);

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        self.interrupted = false;

        if !status.success() {
            return Err(PipelineError::Generation(format!(
                "ffmpeg exited with {status}: {}",
                stderr.trim()
            )));
        }

        tracing::debug!(video = %video_path.display(), frames = settings.max_frames, "Smoke video written");
        Ok(AnimationOutput {
            status: Some("completed".into()),
            timestring: Some(settings.timestring.clone()),
            outdir: Some(outdir),
            max_frames: Some(settings.max_frames),
            video_path: Some(video_path),
        })
    }
}

/// Loader for [`SmokePipeline`]; the model source is ignored.
#[derive(Debug, Clone)]
pub struct SmokeLoader {
    ffmpeg: PathBuf,
    output_root: PathBuf,
}

impl SmokeLoader {
    pub fn new(ffmpeg: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            output_root: output_root.into(),
        }
    }
}

#[async_trait]
impl PipelineLoader for SmokeLoader {
    async fn load(&self, _model: &ModelSource) -> Result<Box<dyn GenerationPipeline>, PipelineError> {
        Ok(Box::new(SmokePipeline::new(
            self.ffmpeg.clone(),
            self.output_root.clone(),
        )))
    }
}
