use std::sync::Arc;

use reelsmith_pipeline::PipelineManager;

use crate::handler::JobHandler;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Runs `/runsync` jobs.
    pub handler: Arc<JobHandler>,
    /// Read by `/health`; never locked there.
    pub manager: Arc<PipelineManager>,
}

impl AppState {
    pub fn new(handler: Arc<JobHandler>) -> Self {
        let manager = Arc::clone(handler.manager());
        Self { handler, manager }
    }
}
