//! Single-pipeline lifecycle manager.
//!
//! [`PipelineManager`] owns at most one loaded [`GenerationPipeline`] per
//! process. Callers obtain it through [`PipelineManager::acquire`], which
//! loads it on first use and returns a [`PipelineLease`] holding the
//! manager's lock. Validation, every recovery tier and the invocation all
//! happen through the lease, so two jobs can never interleave on the shared
//! pipeline and a full reload can never race another job's acquire.
//!
//! The current [`PipelineState`] and recovery counters are published on a
//! [`tokio::sync::watch`] channel; reading them never waits on the lock.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::backend::{GenerationPipeline, HealthStatus, PipelineLoader};
use crate::error::PipelineError;
use crate::model::ModelResolver;

/// Lifecycle state of the managed pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// No pipeline is loaded (initially, or after a failed reload).
    Unloaded,
    /// A model is being resolved and loaded.
    Loading,
    /// The pipeline passed its last health check.
    Ready,
    /// The pipeline failed its health check and is being recovered.
    Degraded,
}

/// How a lease's validation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The health check passed; nothing was done.
    Healthy,
    /// Tier 1: the generator was reset in place.
    Reset,
    /// Tier 2: the generator was rebuilt from its construction arguments.
    GeneratorRebuilt,
    /// Tier 3: the whole pipeline was discarded and loaded again.
    Reloaded,
}

/// Snapshot of the manager's observable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub state: PipelineState,
    /// Successful loads, including tier-3 reloads.
    pub loads: u64,
    pub resets: u64,
    pub generator_rebuilds: u64,
    pub full_rebuilds: u64,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self {
            state: PipelineState::Unloaded,
            loads: 0,
            resets: 0,
            generator_rebuilds: 0,
            full_rebuilds: 0,
        }
    }
}

struct Slot {
    pipeline: Option<Box<dyn GenerationPipeline>>,
    /// Incremented on every successful load.
    instance: u64,
}

/// Owns the process's single generation pipeline.
pub struct PipelineManager {
    resolver: Arc<dyn ModelResolver>,
    loader: Arc<dyn PipelineLoader>,
    slot: Mutex<Slot>,
    stats_tx: watch::Sender<PipelineStats>,
}

impl PipelineManager {
    pub fn new(resolver: Arc<dyn ModelResolver>, loader: Arc<dyn PipelineLoader>) -> Self {
        let (stats_tx, _) = watch::channel(PipelineStats::default());
        Self {
            resolver,
            loader,
            slot: Mutex::new(Slot {
                pipeline: None,
                instance: 0,
            }),
            stats_tx,
        }
    }

    /// Lock the pipeline, loading it first if none is resident.
    ///
    /// Fails with [`PipelineError::ModelLoad`] when the model cannot be
    /// resolved or constructed; the next call tries again from scratch.
    pub async fn acquire(&self) -> Result<PipelineLease<'_>, PipelineError> {
        let mut slot = self.slot.lock().await;
        if slot.pipeline.is_none() {
            self.load_into(&mut slot).await?;
        }
        Ok(PipelineLease {
            manager: self,
            slot,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.stats_tx.borrow().state
    }

    /// Current state and counters.
    pub fn stats(&self) -> PipelineStats {
        self.stats_tx.borrow().clone()
    }

    /// Receive every future state/counter change.
    pub fn subscribe(&self) -> watch::Receiver<PipelineStats> {
        self.stats_tx.subscribe()
    }

    /// Shut down and drop the resident pipeline, if any.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(mut pipeline) = slot.pipeline.take() {
            pipeline.shutdown().await;
            self.set_state(PipelineState::Unloaded);
            tracing::info!(backend = pipeline.name(), "Pipeline shut down");
        }
    }

    fn set_state(&self, state: PipelineState) {
        self.stats_tx.send_if_modified(|stats| {
            let changed = stats.state != state;
            if changed {
                tracing::debug!(from = ?stats.state, to = ?state, "Pipeline state transition");
                stats.state = state;
            }
            changed
        });
    }

    fn bump(&self, counter: impl FnOnce(&mut PipelineStats)) {
        self.stats_tx.send_modify(counter);
    }

    async fn load_into(&self, slot: &mut Slot) -> Result<(), PipelineError> {
        self.set_state(PipelineState::Loading);

        let loaded = async {
            let source = self
                .resolver
                .resolve()
                .await
                .map_err(|e| PipelineError::ModelLoad(e.to_string()))?;
            tracing::info!(source = ?source, "Loading pipeline");
            self.loader.load(&source).await
        }
        .await;

        match loaded {
            Ok(pipeline) => {
                slot.instance += 1;
                tracing::info!(
                    instance = slot.instance,
                    backend = pipeline.name(),
                    "Pipeline loaded",
                );
                slot.pipeline = Some(pipeline);
                self.bump(|s| s.loads += 1);
                self.set_state(PipelineState::Ready);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Pipeline load failed");
                self.set_state(PipelineState::Unloaded);
                Err(match e {
                    PipelineError::ModelLoad(_) => e,
                    other => PipelineError::ModelLoad(other.to_string()),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// Exclusive access to the managed pipeline for one job.
///
/// Dropping the lease releases the lock.
pub struct PipelineLease<'a> {
    manager: &'a PipelineManager,
    slot: MutexGuard<'a, Slot>,
}

impl std::fmt::Debug for PipelineLease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineLease")
            .field("instance", &self.slot.instance)
            .field("loaded", &self.slot.pipeline.is_some())
            .finish()
    }
}

impl PipelineLease<'_> {
    /// Identifies the loaded pipeline; changes only when a new one is loaded.
    pub fn instance_id(&self) -> u64 {
        self.slot.instance
    }

    /// The leased pipeline.
    pub fn pipeline_mut(&mut self) -> Result<&mut dyn GenerationPipeline, PipelineError> {
        let pipeline: &mut dyn GenerationPipeline = self
            .slot
            .pipeline
            .as_deref_mut()
            .ok_or_else(|| PipelineError::Unrecoverable("no pipeline is loaded".into()))?;
        Ok(pipeline)
    }

    /// Health-check the pipeline and recover it if the check fails.
    pub async fn validate(&mut self) -> Result<RecoveryOutcome, PipelineError> {
        let status = match self.slot.pipeline.as_deref_mut() {
            Some(pipeline) => pipeline.health_check(),
            None => HealthStatus::unhealthy("no pipeline is loaded"),
        };

        match status {
            HealthStatus::Healthy => {
                self.manager.set_state(PipelineState::Ready);
                Ok(RecoveryOutcome::Healthy)
            }
            HealthStatus::Unhealthy { reason } => self.recover(&reason).await,
        }
    }

    /// Walk the recovery tiers until one leaves a healthy pipeline.
    ///
    /// Tier 1 resets the generator in place, tier 2 rebuilds it, tier 3
    /// discards the pipeline and loads a new one. A failed tier 3 leaves no
    /// pipeline resident, so the next [`PipelineManager::acquire`] loads
    /// from scratch.
    pub async fn recover(&mut self, reason: &str) -> Result<RecoveryOutcome, PipelineError> {
        let manager = self.manager;
        let instance = self.slot.instance;
        manager.set_state(PipelineState::Degraded);
        tracing::warn!(instance, reason, "Pipeline unhealthy, starting recovery");

        if let Some(pipeline) = self.slot.pipeline.as_deref_mut() {
            // Tier 1
            match pipeline.reset_generator().await {
                Ok(()) => match pipeline.health_check() {
                    HealthStatus::Healthy => {
                        tracing::warn!(instance, "Recovered by generator reset");
                        manager.bump(|s| s.resets += 1);
                        manager.set_state(PipelineState::Ready);
                        return Ok(RecoveryOutcome::Reset);
                    }
                    HealthStatus::Unhealthy { reason } => {
                        tracing::warn!(%reason, "Still unhealthy after generator reset");
                    }
                },
                Err(PipelineError::ResetUnsupported) => {
                    tracing::warn!(backend = pipeline.name(), "Generator reset not supported");
                }
                Err(e) => tracing::warn!(error = %e, "Generator reset failed"),
            }

            // Tier 2
            match pipeline.rebuild_generator().await {
                Ok(()) => match pipeline.health_check() {
                    HealthStatus::Healthy => {
                        tracing::warn!(instance, "Recovered by generator rebuild");
                        manager.bump(|s| s.generator_rebuilds += 1);
                        manager.set_state(PipelineState::Ready);
                        return Ok(RecoveryOutcome::GeneratorRebuilt);
                    }
                    HealthStatus::Unhealthy { reason } => {
                        tracing::warn!(%reason, "Still unhealthy after generator rebuild");
                    }
                },
                Err(e) => tracing::warn!(error = %e, "Generator rebuild failed"),
            }
        }

        // Tier 3
        tracing::warn!(instance, "Discarding pipeline for full reload");
        if let Some(mut old) = self.slot.pipeline.take() {
            old.shutdown().await;
        }

        if let Err(e) = manager.load_into(&mut *self.slot).await {
            tracing::error!(error = %e, "Full pipeline reload failed");
            return Err(PipelineError::Unrecoverable(e.to_string()));
        }

        let status = match self.slot.pipeline.as_deref_mut() {
            Some(pipeline) => pipeline.health_check(),
            None => HealthStatus::unhealthy("no pipeline is loaded"),
        };
        if let HealthStatus::Unhealthy { reason } = status {
            tracing::error!(%reason, "Reloaded pipeline is unhealthy");
            if let Some(mut fresh) = self.slot.pipeline.take() {
                fresh.shutdown().await;
            }
            manager.set_state(PipelineState::Unloaded);
            return Err(PipelineError::Unrecoverable(format!(
                "reloaded pipeline is unhealthy: {reason}"
            )));
        }

        tracing::warn!(instance = self.slot.instance, "Recovered by full reload");
        manager.bump(|s| s.full_rebuilds += 1);
        Ok(RecoveryOutcome::Reloaded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use reelsmith_core::settings::ResolvedSettings;

    use super::*;
    use crate::backend::{AnimationOutput, FrameEvent, InvocationConfig};
    use crate::model::{BundledModel, ModelSource};

    // -- Fakes --------------------------------------------------------------

    /// Scripted behaviour shared between a test and the pipelines it loads.
    #[derive(Default)]
    struct Script {
        /// Health results popped per check; empty means healthy.
        health: StdMutex<Vec<bool>>,
        reset_ok: bool,
        rebuild_ok: bool,
        /// Loads beyond this count fail.
        max_loads: Option<usize>,
        /// Every pipeline loaded after the first starts unhealthy.
        reloads_unhealthy: bool,
    }

    struct FakePipeline {
        script: Arc<Script>,
        healthy_override: Option<bool>,
    }

    #[async_trait]
    impl GenerationPipeline for FakePipeline {
        fn name(&self) -> &str {
            "fake"
        }

        fn health_check(&mut self) -> HealthStatus {
            if let Some(h) = self.healthy_override {
                return if h { HealthStatus::Healthy } else { HealthStatus::unhealthy("scripted") };
            }
            let mut queue = self.script.health.lock().unwrap();
            if queue.is_empty() || queue.remove(0) {
                HealthStatus::Healthy
            } else {
                HealthStatus::unhealthy("scripted")
            }
        }

        async fn reset_generator(&mut self) -> Result<(), PipelineError> {
            if self.script.reset_ok {
                Ok(())
            } else {
                Err(PipelineError::Recovery("reset failed".into()))
            }
        }

        async fn rebuild_generator(&mut self) -> Result<(), PipelineError> {
            if self.script.rebuild_ok {
                Ok(())
            } else {
                Err(PipelineError::Recovery("rebuild failed".into()))
            }
        }

        async fn run(
            &mut self,
            _settings: &ResolvedSettings,
            _config: &InvocationConfig,
            _on_frame: &mut (dyn FnMut(FrameEvent) + Send),
        ) -> Result<AnimationOutput, PipelineError> {
            Ok(AnimationOutput::default())
        }
    }

    struct FakeLoader {
        script: Arc<Script>,
        loads: AtomicUsize,
    }

    #[async_trait]
    impl PipelineLoader for FakeLoader {
        async fn load(
            &self,
            _model: &ModelSource,
        ) -> Result<Box<dyn GenerationPipeline>, PipelineError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
            if self.script.max_loads.is_some_and(|max| n > max) {
                return Err(PipelineError::ModelLoad("weights missing".into()));
            }
            let healthy_override = (self.script.reloads_unhealthy && n > 1).then_some(false);
            Ok(Box::new(FakePipeline {
                script: Arc::clone(&self.script),
                healthy_override,
            }))
        }
    }

    fn manager(script: Script) -> (PipelineManager, Arc<FakeLoader>) {
        let loader = Arc::new(FakeLoader {
            script: Arc::new(script),
            loads: AtomicUsize::new(0),
        });
        let manager = PipelineManager::new(Arc::new(BundledModel), loader.clone());
        (manager, loader)
    }

    fn loads(loader: &FakeLoader) -> usize {
        loader.loads.load(Ordering::SeqCst)
    }

    // -- Acquire ------------------------------------------------------------

    #[tokio::test]
    async fn acquire_is_idempotent() {
        let (manager, loader) = manager(Script::default());
        assert_eq!(manager.state(), PipelineState::Unloaded);

        let first = manager.acquire().await.unwrap().instance_id();
        let second = manager.acquire().await.unwrap().instance_id();

        assert_eq!(first, second);
        assert_eq!(loads(&loader), 1);
        assert_eq!(manager.state(), PipelineState::Ready);
        assert_eq!(manager.stats().loads, 1);
    }

    #[tokio::test]
    async fn acquire_failure_is_model_load_and_retried() {
        let (manager, loader) = manager(Script {
            max_loads: Some(0),
            ..Script::default()
        });

        assert_matches!(manager.acquire().await, Err(PipelineError::ModelLoad(_)));
        assert_eq!(manager.state(), PipelineState::Unloaded);
        assert_matches!(manager.acquire().await, Err(PipelineError::ModelLoad(_)));
        assert_eq!(loads(&loader), 2);
    }

    #[tokio::test]
    async fn acquire_waits_for_outstanding_lease() {
        let (manager, _loader) = manager(Script::default());
        let manager = Arc::new(manager);

        let lease = manager.acquire().await.unwrap();
        let contender = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.acquire().await.map(|l| l.instance_id()) })
        };

        tokio::task::yield_now().await;
        assert!(!contender.is_finished());
        drop(lease);
        assert_eq!(contender.await.unwrap().unwrap(), 1);
    }

    // -- Validate / recover -------------------------------------------------

    #[tokio::test]
    async fn healthy_pipeline_needs_no_recovery() {
        let (manager, _loader) = manager(Script::default());
        let mut lease = manager.acquire().await.unwrap();
        assert_eq!(lease.validate().await.unwrap(), RecoveryOutcome::Healthy);
    }

    #[tokio::test]
    async fn tier_one_reset_avoids_reload() {
        let (manager, loader) = manager(Script {
            health: StdMutex::new(vec![false, true]),
            reset_ok: true,
            ..Script::default()
        });

        let mut lease = manager.acquire().await.unwrap();
        let instance = lease.instance_id();
        assert_eq!(lease.validate().await.unwrap(), RecoveryOutcome::Reset);
        assert_eq!(lease.instance_id(), instance);
        assert!(lease.pipeline_mut().is_ok());
        drop(lease);

        assert_eq!(loads(&loader), 1);
        let stats = manager.stats();
        assert_eq!(stats.state, PipelineState::Ready);
        assert_eq!(stats.resets, 1);
        assert_eq!(stats.full_rebuilds, 0);
    }

    #[tokio::test]
    async fn tier_two_rebuild_after_failed_reset() {
        let (manager, loader) = manager(Script {
            health: StdMutex::new(vec![false, true]),
            reset_ok: false,
            rebuild_ok: true,
            ..Script::default()
        });

        let mut lease = manager.acquire().await.unwrap();
        assert_eq!(lease.validate().await.unwrap(), RecoveryOutcome::GeneratorRebuilt);
        drop(lease);

        assert_eq!(loads(&loader), 1);
        assert_eq!(manager.stats().generator_rebuilds, 1);
    }

    #[tokio::test]
    async fn failed_tiers_trigger_exactly_one_reload() {
        let (manager, loader) = manager(Script {
            health: StdMutex::new(vec![false]),
            ..Script::default()
        });

        let mut lease = manager.acquire().await.unwrap();
        let before = lease.instance_id();
        assert_eq!(lease.validate().await.unwrap(), RecoveryOutcome::Reloaded);
        assert_ne!(lease.instance_id(), before);
        drop(lease);

        assert_eq!(loads(&loader), 2);
        let stats = manager.stats();
        assert_eq!(stats.full_rebuilds, 1);
        assert_eq!(stats.loads, 2);
        assert_eq!(stats.state, PipelineState::Ready);
    }

    #[tokio::test]
    async fn failed_reload_is_unrecoverable_and_next_acquire_retries() {
        let (manager, loader) = manager(Script {
            health: StdMutex::new(vec![false]),
            max_loads: Some(1),
            ..Script::default()
        });

        let mut lease = manager.acquire().await.unwrap();
        assert_matches!(lease.validate().await, Err(PipelineError::Unrecoverable(_)));
        assert!(matches!(lease.pipeline_mut(), Err(PipelineError::Unrecoverable(_))));
        drop(lease);

        assert_eq!(loads(&loader), 2);
        assert_eq!(manager.state(), PipelineState::Unloaded);

        assert_matches!(manager.acquire().await, Err(PipelineError::ModelLoad(_)));
        assert_eq!(loads(&loader), 3);
    }

    #[tokio::test]
    async fn unhealthy_reload_is_unrecoverable() {
        let (manager, loader) = manager(Script {
            health: StdMutex::new(vec![false]),
            reloads_unhealthy: true,
            ..Script::default()
        });

        let mut lease = manager.acquire().await.unwrap();
        assert_matches!(lease.validate().await, Err(PipelineError::Unrecoverable(_)));
        drop(lease);

        assert_eq!(loads(&loader), 2);
        assert_eq!(manager.state(), PipelineState::Unloaded);
        assert_eq!(manager.stats().full_rebuilds, 0);
    }

    #[tokio::test]
    async fn state_changes_are_published() {
        let (manager, _loader) = manager(Script {
            health: StdMutex::new(vec![false, true]),
            reset_ok: true,
            ..Script::default()
        });
        let mut rx = manager.subscribe();

        let mut lease = manager.acquire().await.unwrap();
        lease.validate().await.unwrap();
        drop(lease);

        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.state, PipelineState::Ready);
        assert_eq!(seen.resets, 1);
    }

    #[tokio::test]
    async fn shutdown_unloads() {
        let (manager, loader) = manager(Script::default());
        drop(manager.acquire().await.unwrap());
        manager.shutdown().await;
        assert_eq!(manager.state(), PipelineState::Unloaded);

        let lease = manager.acquire().await.unwrap();
        assert_eq!(lease.instance_id(), 2);
        assert_eq!(loads(&loader), 2);
    }
}
