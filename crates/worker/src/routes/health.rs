use axum::extract::State;
use axum::{routing::get, Json, Router};
use reelsmith_pipeline::PipelineState;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok` when the pipeline is loaded and healthy, `degraded` otherwise.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub pipeline_state: PipelineState,
    pub loads: u64,
    pub resets: u64,
    pub generator_rebuilds: u64,
    pub full_rebuilds: u64,
}

/// GET /health -- pipeline state and recovery counters.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.manager.stats();

    let status = if stats.state == PipelineState::Ready {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        pipeline_state: stats.state,
        loads: stats.loads,
        resets: stats.resets,
        generator_rebuilds: stats.generator_rebuilds,
        full_rebuilds: stats.full_rebuilds,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
