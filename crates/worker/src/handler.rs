//! Per-job orchestration.
//!
//! [`JobHandler::handle`] is the single entry point for one job: input
//! extraction, settings resolution, asset staging, the pipeline lease,
//! generation and publication. It never fails; every error becomes a
//! typed `FAILED` response.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reelsmith_cloud::{PublishedArtifact, ResultPublisher};
use reelsmith_core::job::JobRequest;
use reelsmith_core::settings::SettingsResolver;
use reelsmith_pipeline::{
    GenerationInvoker, NullProgressSink, PipelineManager, ProgressSink, RecoveryOutcome,
};

use crate::error::JobError;
use crate::response::JobResponse;
use crate::staging::AssetStager;

/// Runs jobs against the process's shared pipeline.
pub struct JobHandler {
    resolver: SettingsResolver,
    stager: AssetStager,
    manager: Arc<PipelineManager>,
    invoker: GenerationInvoker,
    publisher: ResultPublisher,
    progress: Arc<dyn ProgressSink>,
    /// Where settings snapshots are written.
    work_dir: PathBuf,
}

impl JobHandler {
    pub fn new(
        manager: Arc<PipelineManager>,
        stager: AssetStager,
        publisher: ResultPublisher,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolver: SettingsResolver::default(),
            stager,
            manager,
            invoker: GenerationInvoker::new(),
            publisher,
            progress: Arc::new(NullProgressSink),
            work_dir: work_dir.into(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_resolver(mut self, resolver: SettingsResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn manager(&self) -> &Arc<PipelineManager> {
        &self.manager
    }

    /// Run `job` to completion.
    pub async fn handle(&self, job: &JobRequest) -> JobResponse {
        tracing::info!(job_id = %job.id, "Job started");

        match self.run(job).await {
            Ok(artifact) => {
                tracing::info!(
                    job_id = %job.id,
                    key = %artifact.key,
                    requires_auth = artifact.requires_auth(),
                    "Job completed",
                );
                JobResponse::completed(&job.id, &artifact)
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, kind = e.kind(), error = %e, "Job failed");
                JobResponse::failed(&job.id, &e)
            }
        }
    }

    async fn run(&self, job: &JobRequest) -> Result<PublishedArtifact, JobError> {
        let job_id = job.id.as_str();

        let params = job.params()?;
        let mut settings = self.resolver.resolve(params)?;
        tracing::debug!(
            job_id,
            timestring = %settings.timestring,
            max_frames = settings.max_frames,
            prompts = settings.animation_prompts.len(),
            "Settings resolved",
        );

        let staged = self.stager.stage(job_id, &mut settings).await;
        let settings_file = settings.persist(&self.work_dir)?;

        let generated = {
            let mut lease = self.manager.acquire().await?;
            match lease.validate().await? {
                RecoveryOutcome::Healthy => {}
                outcome => {
                    tracing::warn!(job_id, ?outcome, instance = lease.instance_id(), "Pipeline recovered before job");
                }
            }
            let pipeline = lease.pipeline_mut()?;
            self.invoker
                .invoke(job_id, pipeline, &settings, self.progress.as_ref())
                .await
        };

        drop(settings_file);
        drop(staged);

        let result = generated?;
        let published = self.publisher.publish(&result.video_path).await;
        if let Some(outdir) = &result.outdir {
            remove_if_empty(job_id, outdir).await;
        }
        Ok(published?)
    }
}

/// Remove the pipeline's per-run output directory once the published video
/// has been deleted from it. Anything else the pipeline left keeps it.
async fn remove_if_empty(job_id: &str, dir: &Path) {
    match tokio::fs::remove_dir(dir).await {
        Ok(()) => tracing::debug!(job_id, dir = %dir.display(), "Removed output directory"),
        Err(e) => tracing::debug!(job_id, dir = %dir.display(), error = %e, "Output directory kept"),
    }
}
