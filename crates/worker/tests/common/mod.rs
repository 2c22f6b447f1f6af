#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use reelsmith_cloud::{MemoryObjectStore, ResultPublisher};
use reelsmith_core::settings::ResolvedSettings;
use reelsmith_pipeline::{
    AnimationOutput, BundledModel, FrameEvent, GenerationPipeline, HealthStatus, InvocationConfig,
    ModelSource, PipelineError, PipelineLoader, PipelineManager, ProgressSink,
};
use serde_json::Value;
use tower::ServiceExt;

use reelsmith_worker::app::build_app_router;
use reelsmith_worker::handler::JobHandler;
use reelsmith_worker::staging::AssetStager;
use reelsmith_worker::state::AppState;

// ---------------------------------------------------------------------------
// Fake pipeline
// ---------------------------------------------------------------------------

/// What the fake pipeline saw during one run.
#[derive(Debug, Clone)]
pub struct ObservedRun {
    pub values: serde_json::Map<String, Value>,
    pub optimize: bool,
    /// Whether the settings snapshot existed while the run was in progress.
    pub settings_file_existed: bool,
    /// Staged asset paths that existed while the run was in progress.
    pub present_assets: Vec<PathBuf>,
}

/// Knobs and observations shared between a test and its fake pipelines.
#[derive(Debug, Default)]
pub struct Script {
    /// Every run fails with a generation error.
    pub fail_runs: AtomicBool,
    /// Runs succeed but report no video.
    pub omit_video: AtomicBool,
    /// Pipelines report unhealthy until the next load.
    pub unhealthy: AtomicBool,
    /// Freshly loaded pipelines are unhealthy too.
    pub broken_on_load: AtomicBool,
    /// Every load fails.
    pub fail_loads: AtomicBool,
    pub loads: AtomicU32,
    pub runs: Mutex<Vec<ObservedRun>>,
}

impl Script {
    pub fn runs(&self) -> Vec<ObservedRun> {
        self.runs.lock().unwrap().clone()
    }
}

pub struct FakePipeline {
    script: Arc<Script>,
    out_dir: PathBuf,
    healthy: bool,
}

#[async_trait]
impl GenerationPipeline for FakePipeline {
    fn name(&self) -> &str {
        "fake"
    }

    fn health_check(&mut self) -> HealthStatus {
        if self.healthy && !self.script.unhealthy.load(Ordering::SeqCst) {
            HealthStatus::Healthy
        } else {
            HealthStatus::unhealthy("fake generator lost")
        }
    }

    async fn rebuild_generator(&mut self) -> Result<(), PipelineError> {
        Err(PipelineError::Recovery("fake rebuild unsupported".into()))
    }

    async fn run(
        &mut self,
        settings: &ResolvedSettings,
        config: &InvocationConfig,
        on_frame: &mut (dyn FnMut(FrameEvent) + Send),
    ) -> Result<AnimationOutput, PipelineError> {
        let present_assets = ["video_init_path", "video_mask_path"]
            .iter()
            .filter_map(|field| settings.get_str(field))
            .map(PathBuf::from)
            .filter(|p| p.is_file())
            .collect();
        self.script.runs.lock().unwrap().push(ObservedRun {
            values: settings.values.clone(),
            optimize: config.optimize,
            settings_file_existed: settings.settings_file.as_deref().is_some_and(Path::is_file),
            present_assets,
        });

        if self.script.fail_runs.load(Ordering::SeqCst) {
            return Err(PipelineError::Generation("CUDA out of memory".into()));
        }

        for frame_idx in 1..=settings.max_frames {
            on_frame(FrameEvent {
                frame_idx,
                preview: None,
            });
        }

        let outdir = self.out_dir.join(&settings.timestring);
        std::fs::create_dir_all(&outdir)?;
        let video = outdir.join(format!("{}.mp4", settings.timestring));
        std::fs::write(&video, b"fake mp4")?;

        Ok(AnimationOutput {
            status: Some("completed".into()),
            timestring: Some(settings.timestring.clone()),
            outdir: Some(outdir),
            max_frames: Some(settings.max_frames),
            video_path: (!self.script.omit_video.load(Ordering::SeqCst)).then_some(video),
        })
    }
}

pub struct FakeLoader {
    pub script: Arc<Script>,
    pub out_dir: PathBuf,
}

#[async_trait]
impl PipelineLoader for FakeLoader {
    async fn load(&self, _model: &ModelSource) -> Result<Box<dyn GenerationPipeline>, PipelineError> {
        if self.script.fail_loads.load(Ordering::SeqCst) {
            return Err(PipelineError::ModelLoad("weights missing".into()));
        }
        self.script.loads.fetch_add(1, Ordering::SeqCst);
        let broken = self.script.broken_on_load.load(Ordering::SeqCst);
        if !broken {
            self.script.unhealthy.store(false, Ordering::SeqCst);
        }
        Ok(Box::new(FakePipeline {
            script: Arc::clone(&self.script),
            out_dir: self.out_dir.clone(),
            healthy: !broken,
        }))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A handler over a fake pipeline and an in-memory bucket.
pub struct Harness {
    pub handler: Arc<JobHandler>,
    pub manager: Arc<PipelineManager>,
    pub store: Arc<MemoryObjectStore>,
    pub script: Arc<Script>,
    pub work_dir: tempfile::TempDir,
    pub out_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(MemoryObjectStore::new("renders"))
    }

    pub fn with_store(store: MemoryObjectStore) -> Self {
        Self::build(store, None)
    }

    pub fn with_progress(progress: Arc<dyn ProgressSink>) -> Self {
        Self::build(MemoryObjectStore::new("renders"), Some(progress))
    }

    fn build(store: MemoryObjectStore, progress: Option<Arc<dyn ProgressSink>>) -> Self {
        let work_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let script = Arc::new(Script::default());
        let store = Arc::new(store);

        let loader = FakeLoader {
            script: Arc::clone(&script),
            out_dir: out_dir.path().to_path_buf(),
        };
        let manager = Arc::new(PipelineManager::new(Arc::new(BundledModel), Arc::new(loader)));
        let publisher = ResultPublisher::new(store.clone()).with_prefix("videos");
        let stager = AssetStager::new(work_dir.path()).unwrap();

        let mut handler = JobHandler::new(Arc::clone(&manager), stager, publisher, work_dir.path());
        if let Some(progress) = progress {
            handler = handler.with_progress(progress);
        }

        Self {
            handler: Arc::new(handler),
            manager,
            store,
            script,
            work_dir,
            out_dir,
        }
    }

    pub fn app(&self) -> Router {
        build_app_router(AppState::new(Arc::clone(&self.handler)), Duration::from_secs(30))
    }

    /// Entries directly under the pipeline's output root.
    pub fn output_entries(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.out_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }

    /// Every regular file left anywhere under the work and output dirs.
    pub fn leftover_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        collect_files(self.work_dir.path(), &mut files);
        collect_files(self.out_dir.path(), &mut files);
        files
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

// ---------------------------------------------------------------------------
// Remote assets
// ---------------------------------------------------------------------------

/// Serve `body` at `/{name}` on an ephemeral local port and return its URL.
pub async fn serve_asset(name: &str, body: &'static [u8]) -> String {
    let app = Router::new().route(&format!("/{name}"), axum::routing::get(move || async move { body }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/{name}")
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Send a GET request to the app and return the response.
pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(app: Router, uri: &str, json: Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json).unwrap()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect the response body and parse it as JSON.
pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
