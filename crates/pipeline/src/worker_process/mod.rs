//! Pipeline backed by a long-running worker process.
//!
//! The model stays resident in a child process that speaks newline
//! delimited JSON over stdio (see [`messages`]). The child announces its
//! capabilities once loaded; the pipeline is healthy while the child is
//! alive, advertises every capability in [`REQUIRED_CAPABILITIES`], and
//! has no run left unfinished.
//!
//! Recovery maps onto the child directly: a generator reset is a `reset`
//! command (only when the child advertises `reset`), and a generator
//! rebuild kills the child and spawns it again from its recorded
//! [`WorkerSpec`].

pub mod messages;
pub mod process;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use reelsmith_core::settings::ResolvedSettings;

pub use self::messages::{WorkerCommand, WorkerMessage};
pub use self::process::{WorkerProcess, WorkerSpec};

use self::messages::RunData;
use crate::backend::{
    AnimationOutput, FrameEvent, GenerationPipeline, HealthStatus, InvocationConfig,
    PipelineLoader,
};
use crate::error::PipelineError;
use crate::model::ModelSource;

/// Capabilities a worker must advertise to accept jobs.
pub const REQUIRED_CAPABILITIES: &[&str] = &["render_animation", "optimize"];

/// Capability enabling in-place generator reset.
pub const RESET_CAPABILITY: &str = "reset";

/// Time allowed for a `reset` command to be acknowledged.
const RESET_TIMEOUT: Duration = Duration::from_secs(60);

/// [`GenerationPipeline`] driving a [`WorkerProcess`].
#[derive(Debug)]
pub struct WorkerProcessPipeline {
    spec: WorkerSpec,
    process: Option<WorkerProcess>,
    /// Set while a run is outstanding; still set afterwards if the run
    /// never reached `finished` or `error`.
    in_flight: bool,
}

impl WorkerProcessPipeline {
    /// Spawn a worker from `spec` and complete its handshake.
    pub async fn spawn(spec: WorkerSpec) -> Result<Self, PipelineError> {
        let process = WorkerProcess::spawn(&spec).await?;
        Ok(Self {
            spec,
            process: Some(process),
            in_flight: false,
        })
    }

    fn process_mut(&mut self) -> Result<&mut WorkerProcess, PipelineError> {
        self.process
            .as_mut()
            .ok_or_else(|| PipelineError::Protocol("worker process is not running".into()))
    }

    async fn load_preview(path: Option<PathBuf>) -> Option<DynamicImage> {
        let path = path?;
        match tokio::task::spawn_blocking(move || image::open(&path)).await {
            Ok(Ok(img)) => Some(img),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Frame preview unreadable");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "Frame preview task failed");
                None
            }
        }
    }
}

#[async_trait]
impl GenerationPipeline for WorkerProcessPipeline {
    fn name(&self) -> &str {
        "worker_process"
    }

    fn health_check(&mut self) -> HealthStatus {
        if self.in_flight {
            return HealthStatus::unhealthy("previous run did not complete");
        }
        let Some(process) = self.process.as_mut() else {
            return HealthStatus::unhealthy("worker process is not running");
        };
        if !process.is_alive() {
            return HealthStatus::unhealthy("worker process exited");
        }
        HealthStatus::from_capabilities(process.capabilities(), REQUIRED_CAPABILITIES)
    }

    async fn reset_generator(&mut self) -> Result<(), PipelineError> {
        let process = self.process_mut()?;
        if !process.supports(RESET_CAPABILITY) {
            return Err(PipelineError::ResetUnsupported);
        }

        process
            .send(&WorkerCommand::Reset)
            .await
            .map_err(|e| PipelineError::Recovery(e.to_string()))?;

        let acknowledged = tokio::time::timeout(RESET_TIMEOUT, async {
            loop {
                match process.next_message().await {
                    Ok(WorkerMessage::ResetDone) => return Ok(()),
                    Ok(WorkerMessage::Error(err)) => {
                        return Err(PipelineError::Recovery(err.message))
                    }
                    Ok(stale) => {
                        tracing::debug!(message = ?stale, "Discarding stale worker message")
                    }
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match acknowledged {
            Ok(Ok(())) => {
                self.in_flight = false;
                Ok(())
            }
            Ok(Err(e)) => Err(PipelineError::Recovery(e.to_string())),
            Err(_elapsed) => Err(PipelineError::Recovery("reset was not acknowledged".into())),
        }
    }

    async fn rebuild_generator(&mut self) -> Result<(), PipelineError> {
        if let Some(mut old) = self.process.take() {
            old.kill().await;
        }
        let process = WorkerProcess::spawn(&self.spec)
            .await
            .map_err(|e| PipelineError::Recovery(e.to_string()))?;
        self.process = Some(process);
        self.in_flight = false;
        Ok(())
    }

    async fn run(
        &mut self,
        settings: &ResolvedSettings,
        config: &InvocationConfig,
        on_frame: &mut (dyn FnMut(FrameEvent) + Send),
    ) -> Result<AnimationOutput, PipelineError> {
        let command = WorkerCommand::Run(RunData {
            settings: settings.values.clone(),
            settings_file: settings.settings_file.clone(),
            optimize: config.optimize,
        });

        self.in_flight = true;
        let process = self.process_mut()?;
        process.send(&command).await?;

        loop {
            match process.next_message().await? {
                WorkerMessage::Frame(frame) => {
                    let preview = Self::load_preview(frame.preview_path).await;
                    on_frame(FrameEvent {
                        frame_idx: frame.frame_idx,
                        preview,
                    });
                }
                WorkerMessage::Finished(output) => {
                    self.in_flight = false;
                    return Ok(output);
                }
                WorkerMessage::Error(err) => {
                    self.in_flight = false;
                    return Err(PipelineError::Generation(err.message));
                }
                other => tracing::debug!(message = ?other, "Ignoring unexpected worker message"),
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.kill().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Builds [`WorkerProcessPipeline`]s running `program script --model <path>`.
#[derive(Debug, Clone)]
pub struct WorkerProcessLoader {
    program: PathBuf,
    script: PathBuf,
    ready_timeout: Duration,
}

impl WorkerProcessLoader {
    pub fn new(program: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
            ready_timeout: process::DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Spawn spec for a worker serving `model`.
    pub fn spec_for(&self, model: &ModelSource) -> WorkerSpec {
        let mut args = vec![self.script.to_string_lossy().into_owned()];
        if let Some(path) = model.path() {
            args.push("--model".into());
            args.push(path.to_string_lossy().into_owned());
        }
        WorkerSpec::new(self.program.clone(), args).with_ready_timeout(self.ready_timeout)
    }
}

#[async_trait]
impl PipelineLoader for WorkerProcessLoader {
    async fn load(&self, model: &ModelSource) -> Result<Box<dyn GenerationPipeline>, PipelineError> {
        let spec = self.spec_for(model);
        let pipeline = WorkerProcessPipeline::spawn(spec)
            .await
            .map_err(|e| PipelineError::ModelLoad(e.to_string()))?;
        Ok(Box::new(pipeline))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use assert_matches::assert_matches;
    use reelsmith_core::settings::SettingsResolver;
    use serde_json::json;

    use super::*;

    /// Shell stand-in for the model worker. `$OUT` names the video it
    /// "renders"; `$CAPS` the capabilities it advertises.
    const FAKE_WORKER: &str = r#"
echo "{\"type\":\"ready\",\"data\":{\"capabilities\":[$CAPS]}}"
while IFS= read -r line; do
  case "$line" in
    *'"type":"reset"'*)
      echo '{"type":"reset_done"}' ;;
    *'"optimize":false'*)
      echo 'loading scheduler...'
      echo '{"type":"frame","data":{"frame_idx":1}}'
      echo '{"type":"error","data":{"message":"optimize off"}}' ;;
    *'"max_frames":13'*)
      exit 3 ;;
    *'"type":"run"'*)
      echo '{"type":"frame","data":{"frame_idx":1}}'
      echo '{"type":"frame","data":{"frame_idx":2}}'
      : > "$OUT"
      echo "{\"type\":\"finished\",\"data\":{\"status\":\"done\",\"max_frames\":2,\"video_path\":\"$OUT\"}}" ;;
  esac
done
"#;

    const ALL_CAPS: &str = r#""render_animation","optimize","reset""#;

    fn spec(caps: &str, out: &std::path::Path) -> WorkerSpec {
        WorkerSpec::new("sh", vec!["-c".into(), FAKE_WORKER.into()])
            .with_env("CAPS", caps)
            .with_env("OUT", out.to_string_lossy())
            .with_ready_timeout(Duration::from_secs(10))
    }

    fn settings(extra: serde_json::Value) -> ResolvedSettings {
        let mut params = serde_json::Map::new();
        params.insert("prompts".into(), json!("a"));
        if let Some(extra) = extra.as_object() {
            params.extend(extra.clone());
        }
        SettingsResolver::default().resolve(params).unwrap()
    }

    async fn run(
        pipeline: &mut WorkerProcessPipeline,
        settings: &ResolvedSettings,
    ) -> (Result<AnimationOutput, PipelineError>, Vec<u32>) {
        let mut frames = Vec::new();
        let config = InvocationConfig::from(settings);
        let result = pipeline
            .run(settings, &config, &mut |f: FrameEvent| frames.push(f.frame_idx))
            .await;
        (result, frames)
    }

    #[tokio::test]
    async fn handshake_and_run() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("video.mp4");
        let mut pipeline = WorkerProcessPipeline::spawn(spec(ALL_CAPS, &out)).await.unwrap();
        assert!(pipeline.health_check().is_healthy());

        let (result, frames) = run(&mut pipeline, &settings(json!({}))).await;
        let output = result.unwrap();
        assert_eq!(frames, vec![1, 2]);
        assert_eq!(output.video_path, Some(out.clone()));
        assert_eq!(output.max_frames, Some(2));
        assert!(out.exists());
        assert!(pipeline.health_check().is_healthy());

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn worker_error_is_generation_error_and_stays_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline =
            WorkerProcessPipeline::spawn(spec(ALL_CAPS, &dir.path().join("v.mp4"))).await.unwrap();

        let (result, frames) = run(&mut pipeline, &settings(json!({ "optimize": false }))).await;
        assert_matches!(result, Err(PipelineError::Generation(msg)) if msg == "optimize off");
        assert_eq!(frames, vec![1]);
        assert!(pipeline.health_check().is_healthy());
    }

    #[tokio::test]
    async fn missing_capability_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = WorkerProcessPipeline::spawn(spec(r#""render_animation""#, &dir.path().join("v.mp4")))
            .await
            .unwrap();
        assert_eq!(
            pipeline.health_check(),
            HealthStatus::unhealthy("missing capabilities: optimize")
        );
        assert_matches!(pipeline.reset_generator().await, Err(PipelineError::ResetUnsupported));
    }

    #[tokio::test]
    async fn reset_is_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline =
            WorkerProcessPipeline::spawn(spec(ALL_CAPS, &dir.path().join("v.mp4"))).await.unwrap();
        pipeline.reset_generator().await.unwrap();
        assert!(pipeline.health_check().is_healthy());
    }

    #[tokio::test]
    async fn crash_mid_run_is_unhealthy_until_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("v.mp4");
        let mut pipeline = WorkerProcessPipeline::spawn(spec(ALL_CAPS, &out)).await.unwrap();

        let (result, _) = run(&mut pipeline, &settings(json!({ "max_frames": 13 }))).await;
        assert_matches!(result, Err(PipelineError::Protocol(_)));
        assert_matches!(pipeline.health_check(), HealthStatus::Unhealthy { .. });

        pipeline.rebuild_generator().await.unwrap();
        assert!(pipeline.health_check().is_healthy());

        let (result, _) = run(&mut pipeline, &settings(json!({}))).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn ready_timeout_fails_spawn() {
        let spec = WorkerSpec::new("sh", vec!["-c".into(), "sleep 30".into()])
            .with_ready_timeout(Duration::from_millis(200));
        assert_matches!(
            WorkerProcessPipeline::spawn(spec).await,
            Err(PipelineError::ModelLoad(msg)) if msg.contains("ready")
        );
    }

    #[tokio::test]
    async fn loader_failure_is_model_load() {
        let loader = WorkerProcessLoader::new("/nonexistent/python", "/app/worker.py");
        assert!(matches!(
            loader.load(&ModelSource::Bundled).await,
            Err(PipelineError::ModelLoad(_))
        ));
    }

    #[test]
    fn spec_passes_model_path() {
        let loader = WorkerProcessLoader::new("python3", "/app/worker.py");
        let spec = loader.spec_for(&ModelSource::Local(PathBuf::from("/models/model.safetensors")));
        assert_eq!(spec.program, PathBuf::from("python3"));
        assert_eq!(
            spec.args,
            vec!["/app/worker.py", "--model", "/models/model.safetensors"]
        );
        assert_eq!(loader.spec_for(&ModelSource::Bundled).args, vec!["/app/worker.py"]);
    }
}
