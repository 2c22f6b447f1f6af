//! Generation pipeline lifecycle.
//!
//! A loaded pipeline is expensive to construct and is shared by every job
//! a worker process handles. [`manager::PipelineManager`] owns that single
//! instance: it loads it on first use, health-checks it before each job,
//! walks the recovery tiers (generator reset, generator rebuild, full
//! reload) when the check fails, and hands out exclusive leases so that
//! validation, recovery and invocation of one job never interleave with
//! another's. [`invoker::GenerationInvoker`] drives one run on a leased
//! pipeline and turns frame callbacks into progress events.
//!
//! Two concrete backends are provided: [`worker_process`], which keeps the
//! model resident in a long-running child process speaking JSON lines
//! over stdio, and [`smoke`], a model-free generator for deployment
//! checks.

pub mod backend;
pub mod error;
pub mod invoker;
pub mod manager;
pub mod model;
pub mod smoke;
pub mod worker_process;

pub use backend::{
    AnimationOutput, FrameEvent, GenerationPipeline, HealthStatus, InvocationConfig,
    PipelineLoader,
};
pub use error::{PipelineError, ProgressError};
pub use invoker::{GenerationInvoker, GenerationResult, NullProgressSink, ProgressSink};
pub use manager::{PipelineLease, PipelineManager, PipelineState, PipelineStats, RecoveryOutcome};
pub use model::{BundledModel, ModelLocateError, ModelLocator, ModelResolver, ModelSource};
pub use smoke::SmokeLoader;
pub use worker_process::WorkerProcessLoader;
