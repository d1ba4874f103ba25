//! Watcher: cooldown-based emitters for lightweight check workflows.
//!
//! Each configured task enqueues its check workflow onto the `alert`
//! queue, waits for that job to reach a terminal state, then schedules
//! the next run `interval_ms` later. Control and state live under the
//! `watcher:*` keys of the same shared store the scheduler uses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::{info, warn};
use uuid::Uuid;

use super::HEARTBEAT_INTERVAL;
use crate::domains::platforms::config::{PlatformCatalog, WatcherTaskSettings};
use crate::kernel::jobs::{keys, Job, QueueResult, QueueStore, PLATFORM_STATE_TTL};

/// Queue the watcher's check jobs land on.
pub const ALERT_PLATFORM: &str = "alert";

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatcherTaskState {
    pub last_job_id: Option<Uuid>,
    pub next_run_at: Option<DateTime<Utc>>,
}

pub async fn set_watcher_enabled(queue: &dyn QueueStore, enabled: bool) -> QueueResult<()> {
    queue
        .set_raw(
            keys::WATCHER_ENABLED,
            if enabled { "true" } else { "false" },
            None,
        )
        .await
}

pub async fn watcher_enabled(queue: &dyn QueueStore) -> QueueResult<bool> {
    Ok(matches!(
        queue.get_raw(keys::WATCHER_ENABLED).await?.as_deref(),
        Some("true") | Some("1")
    ))
}

async fn task_state(queue: &dyn QueueStore, task: &str) -> QueueResult<WatcherTaskState> {
    match queue.get_raw(&keys::watcher_state(task)).await? {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(WatcherTaskState::default()),
    }
}

async fn save_task_state(
    queue: &dyn QueueStore,
    task: &str,
    state: &WatcherTaskState,
) -> QueueResult<()> {
    queue
        .set_raw(
            &keys::watcher_state(task),
            &serde_json::to_string(state)?,
            Some(PLATFORM_STATE_TTL),
        )
        .await
}

pub struct Watcher {
    queue: Arc<dyn QueueStore>,
    platforms: Arc<PlatformCatalog>,
    shutdown: Arc<AtomicBool>,
}

impl Watcher {
    pub fn new(queue: Arc<dyn QueueStore>, platforms: Arc<PlatformCatalog>) -> Self {
        Self {
            queue,
            platforms,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub async fn run(self) {
        let tasks = self.platforms.watcher.tasks.clone();
        if tasks.is_empty() {
            info!("watcher has no configured tasks; not starting");
            return;
        }
        info!(tasks = tasks.len(), "watcher starting");

        let mut last_heartbeat: Option<Instant> = None;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            if last_heartbeat.map_or(true, |at| at.elapsed() >= HEARTBEAT_INTERVAL) {
                match self.write_heartbeat().await {
                    Ok(()) => last_heartbeat = Some(Instant::now()),
                    Err(e) => warn!(error = %e, "watcher heartbeat failed"),
                }
            }

            match watcher_enabled(self.queue.as_ref()).await {
                Ok(true) => {
                    for task in &tasks {
                        if let Err(e) = self.advance_task(task).await {
                            warn!(task = %task.name, error = %e, "watcher task advance failed");
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "watcher enabled check failed"),
            }

            tokio::time::sleep(TICK).await;
        }
        info!("watcher stopped");
    }

    pub async fn write_heartbeat(&self) -> QueueResult<()> {
        self.queue
            .set_raw(
                keys::WATCHER_HEARTBEAT_AT,
                &Utc::now().to_rfc3339(),
                Some(PLATFORM_STATE_TTL),
            )
            .await
    }

    /// Drive one task through its emit -> wait -> reschedule cycle.
    pub async fn advance_task(&self, task: &WatcherTaskSettings) -> QueueResult<()> {
        let queue = self.queue.as_ref();
        let mut state = task_state(queue, &task.name).await?;
        let now = Utc::now();

        if let Some(job_id) = state.last_job_id {
            let finished = match queue.get(job_id).await? {
                Some(job) => job.is_terminal(),
                // Record expired or was cleared; treat the run as over.
                None => true,
            };
            if !finished {
                return Ok(());
            }
            state.last_job_id = None;
            state.next_run_at =
                Some(now + chrono::Duration::milliseconds(task.interval_ms as i64));
            save_task_state(queue, &task.name, &state).await?;
            return Ok(());
        }

        let due = state.next_run_at.map_or(true, |at| now >= at);
        if !due {
            return Ok(());
        }

        let mut params = Map::new();
        params.insert("check".to_string(), json!(task.name));
        let mut metadata = Map::new();
        metadata.insert("watcher".to_string(), json!(true));

        let job = Job::builder()
            .workflow_id(task.workflow_id.clone())
            .platform(ALERT_PLATFORM)
            .params(params)
            .metadata(metadata)
            .build();
        queue.enqueue(ALERT_PLATFORM, &job).await?;
        info!(task = %task.name, job_id = %job.id, "watcher emitted check job");

        state.last_job_id = Some(job.id);
        save_task_state(queue, &task.name, &state).await?;
        Ok(())
    }
}
