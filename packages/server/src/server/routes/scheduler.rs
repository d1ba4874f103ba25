use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::domains::scheduler::{self, SchedulerStatus};
use crate::server::app::AppState;

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared_jobs: Option<usize>,
}

pub async fn scheduler_start_handler(
    State(state): State<AppState>,
) -> Result<Json<ToggleResponse>, (StatusCode, String)> {
    scheduler::set_enabled(state.deps.queue.as_ref(), true)
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(ToggleResponse {
        enabled: true,
        cleared_jobs: None,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StopQuery {
    #[serde(default)]
    pub clear_queue: bool,
}

pub async fn scheduler_stop_handler(
    State(state): State<AppState>,
    Query(query): Query<StopQuery>,
) -> Result<Json<ToggleResponse>, (StatusCode, String)> {
    let cleared = scheduler::stop(
        state.deps.queue.as_ref(),
        &state.deps.platforms.scheduler,
        query.clear_queue,
    )
    .await
    .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    Ok(Json(ToggleResponse {
        enabled: false,
        cleared_jobs: query.clear_queue.then_some(cleared),
    }))
}

pub async fn scheduler_status_handler(
    State(state): State<AppState>,
) -> Result<Json<SchedulerStatus>, (StatusCode, String)> {
    let status = scheduler::status(state.deps.queue.as_ref(), &state.deps.platforms.scheduler)
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(status))
}
