//! Application setup: the thin HTTP control surface over the service.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::ServerDeps;
use crate::server::routes::{
    execute_workflow_handler, get_job_handler, health_handler, list_workflows_handler,
    scheduler_start_handler, scheduler_status_handler, scheduler_stop_handler,
};

#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<ServerDeps>,
}

pub fn build_app(deps: Arc<ServerDeps>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/workflows", get(list_workflows_handler))
        .route("/workflows/execute", post(execute_workflow_handler))
        .route("/workflows/jobs/:id", get(get_job_handler))
        .route("/scheduler/start", post(scheduler_start_handler))
        .route("/scheduler/stop", post(scheduler_stop_handler))
        .route("/scheduler/status", get(scheduler_status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { deps })
}
