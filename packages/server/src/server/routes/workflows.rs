use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::kernel::jobs::Job;
use crate::server::app::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub workflow_id: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub job_id: Uuid,
}

/// Enqueue a job for a named workflow.
pub async fn execute_workflow_handler(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<ExecuteResponse>), (StatusCode, String)> {
    // Fail fast on unknown or invalid workflows.
    state
        .deps
        .workflows
        .load(&request.workflow_id)
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;

    let platform = request.platform.unwrap_or_else(|| "default".to_string());
    let job = Job::builder()
        .workflow_id(request.workflow_id)
        .platform(platform.clone())
        .priority(request.priority)
        .params(request.params)
        .build();

    state
        .deps
        .queue
        .enqueue(&platform, &job)
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    Ok((StatusCode::ACCEPTED, Json(ExecuteResponse { job_id: job.id })))
}

/// Read one job record.
pub async fn get_job_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, (StatusCode, String)> {
    match state.deps.queue.get(id).await {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("job {id} not found"))),
        Err(e) => Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string())),
    }
}

/// Ids of workflow definitions available on disk.
pub async fn list_workflows_handler(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.deps.workflows.list().await)
}
