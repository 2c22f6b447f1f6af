use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::post, Json, Router};
use reelsmith_core::job::JobRequest;
use serde_json::json;

use crate::response::RunRequest;
use crate::state::AppState;

/// POST /runsync -- run one job to completion.
///
/// The job runs on its own task, so a client that disconnects mid-run does
/// not abort generation and leave the pipeline half-finished.
async fn run_sync(State(state): State<AppState>, Json(body): Json<RunRequest>) -> Response {
    let id = body
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let job = JobRequest::new(id, body.input);

    let handler = state.handler.clone();
    let task = tokio::spawn(async move { handler.handle(&job).await });

    match task.await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Job task aborted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "INTERNAL_ERROR", "message": "Job task aborted" })),
            )
                .into_response()
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/runsync", post(run_sync))
}
