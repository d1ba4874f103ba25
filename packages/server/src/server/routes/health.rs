use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    queue_store: String,
    workflows: usize,
}

/// Health check endpoint.
///
/// Reports queue store connectivity and the number of loadable workflow
/// definitions. Returns 503 when the queue store is unreachable.
pub async fn health_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let queue_ok = state.deps.queue.health().await;
    let workflows = state.deps.workflows.list().await.len();

    let (status_code, status) = if queue_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            queue_store: if queue_ok { "ok" } else { "error" }.to_string(),
            workflows,
        }),
    )
}
