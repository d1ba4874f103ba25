//! Platform scheduler: decides which per-platform queue to feed next.
//!
//! Each tick walks the configured platform list. A platform is admitted
//! when its own cooldown (measured from the last completed run) and the
//! global inter-platform spacing are both satisfied. Sale-state coverage
//! alternates on the configured ratio: R on-sale emissions, then one
//! off-sale emission, then the counter resets.

pub mod watcher;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::common::SaleState;
use crate::domains::platforms::config::{PlatformCatalog, SchedulerSettings};
use crate::kernel::jobs::{
    keys, Job, QueueResult, QueueStore, GLOBAL_SPACING_TTL, PLATFORM_STATE_TTL,
};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Per-platform scheduler state held in the shared store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformState {
    pub on_sale_counter: u32,
    pub last_completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Shared-state helpers (also used by the control surface and workers)
// ---------------------------------------------------------------------------

pub async fn set_enabled(queue: &dyn QueueStore, enabled: bool) -> QueueResult<()> {
    queue
        .set_raw(
            keys::SCHEDULER_ENABLED,
            if enabled { "true" } else { "false" },
            None,
        )
        .await
}

pub async fn is_enabled(queue: &dyn QueueStore) -> QueueResult<bool> {
    Ok(matches!(
        queue.get_raw(keys::SCHEDULER_ENABLED).await?.as_deref(),
        Some("true") | Some("1")
    ))
}

pub async fn platform_state(queue: &dyn QueueStore, platform: &str) -> QueueResult<PlatformState> {
    match queue.get_raw(&keys::scheduler_state(platform)).await? {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(PlatformState::default()),
    }
}

pub async fn save_platform_state(
    queue: &dyn QueueStore,
    platform: &str,
    state: &PlatformState,
) -> QueueResult<()> {
    queue
        .set_raw(
            &keys::scheduler_state(platform),
            &serde_json::to_string(state)?,
            Some(PLATFORM_STATE_TTL),
        )
        .await
}

/// Completion hook: stamps `last_completed_at`, preserving the sale
/// counter. Invoked by workers when a run on the platform finishes.
pub async fn mark_platform_completed(queue: &dyn QueueStore, platform: &str) -> QueueResult<()> {
    let mut state = platform_state(queue, platform).await?;
    state.last_completed_at = Some(Utc::now());
    save_platform_state(queue, platform, &state).await
}

pub async fn last_enqueue_at(queue: &dyn QueueStore) -> QueueResult<Option<DateTime<Utc>>> {
    let raw = queue.get_raw(keys::SCHEDULER_LAST_ENQUEUE_AT).await?;
    Ok(raw
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis))
}

async fn stamp_last_enqueue(queue: &dyn QueueStore, at: DateTime<Utc>) -> QueueResult<()> {
    queue
        .set_raw(
            keys::SCHEDULER_LAST_ENQUEUE_AT,
            &at.timestamp_millis().to_string(),
            Some(GLOBAL_SPACING_TTL),
        )
        .await
}

/// Stop the scheduler; optionally drop every pending platform job.
pub async fn stop(
    queue: &dyn QueueStore,
    settings: &SchedulerSettings,
    clear_queues: bool,
) -> QueueResult<usize> {
    set_enabled(queue, false).await?;
    let mut cleared = 0;
    if clear_queues {
        for platform in &settings.platforms {
            cleared += queue.clear(platform).await?;
        }
    }
    Ok(cleared)
}

#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub last_enqueue_at: Option<DateTime<Utc>>,
    pub queue_depths: BTreeMap<String, usize>,
    pub platform_states: BTreeMap<String, PlatformState>,
    pub running_jobs: usize,
}

pub async fn status(
    queue: &dyn QueueStore,
    settings: &SchedulerSettings,
) -> QueueResult<SchedulerStatus> {
    let heartbeat_at = queue
        .get_raw(keys::SCHEDULER_HEARTBEAT_AT)
        .await?
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let mut queue_depths = BTreeMap::new();
    let mut platform_states = BTreeMap::new();
    for platform in &settings.platforms {
        queue_depths.insert(platform.clone(), queue.queue_depth(platform).await?);
        platform_states.insert(platform.clone(), platform_state(queue, platform).await?);
    }

    Ok(SchedulerStatus {
        enabled: is_enabled(queue).await?,
        heartbeat_at,
        last_enqueue_at: last_enqueue_at(queue).await?,
        queue_depths,
        platform_states,
        running_jobs: queue.list_running().await?.len(),
    })
}

// ---------------------------------------------------------------------------
// Scheduler loop
// ---------------------------------------------------------------------------

pub struct PlatformScheduler {
    queue: Arc<dyn QueueStore>,
    platforms: Arc<PlatformCatalog>,
    shutdown: Arc<AtomicBool>,
}

impl PlatformScheduler {
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

    /// Run until shutdown. Queue store failures back off exponentially
    /// (capped) and never propagate to workers.
    pub async fn run(self) {
        let settings = self.platforms.scheduler.clone();
        info!(
            platforms = ?settings.platforms,
            tick_ms = settings.tick_ms,
            on_sale_ratio = settings.on_sale_ratio,
            "platform scheduler starting"
        );

        let tick = Duration::from_millis(settings.tick_ms);
        let mut backoff = Duration::from_secs(1);
        let mut last_heartbeat: Option<Instant> = None;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            if last_heartbeat.map_or(true, |at| at.elapsed() >= HEARTBEAT_INTERVAL) {
                match self.write_heartbeat().await {
                    Ok(()) => last_heartbeat = Some(Instant::now()),
                    Err(e) => warn!(error = %e, "scheduler heartbeat failed"),
                }
            }

            match self.schedule_pass().await {
                Ok(emitted) => {
                    if emitted > 0 {
                        debug!(emitted, "scheduler pass emitted jobs");
                    }
                    backoff = Duration::from_secs(1);
                    tokio::time::sleep(tick).await;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "scheduler pass failed; backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(60));
                }
            }
        }
        info!("platform scheduler stopped");
    }

    /// One walk over the configured platform list. Returns how many jobs
    /// were emitted; zero when disabled or nothing was admitted.
    pub async fn schedule_pass(&self) -> QueueResult<usize> {
        if !is_enabled(self.queue.as_ref()).await? {
            return Ok(0);
        }
        let settings = &self.platforms.scheduler;
        let mut emitted = 0;
        for platform in &settings.platforms {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if self.try_schedule(platform, settings).await? {
                emitted += 1;
            }
        }
        Ok(emitted)
    }

    pub async fn write_heartbeat(&self) -> QueueResult<()> {
        self.queue
            .set_raw(
                keys::SCHEDULER_HEARTBEAT_AT,
                &Utc::now().to_rfc3339(),
                Some(GLOBAL_SPACING_TTL),
            )
            .await
    }

    async fn try_schedule(
        &self,
        platform: &str,
        settings: &SchedulerSettings,
    ) -> QueueResult<bool> {
        let now = Utc::now();
        let queue = self.queue.as_ref();

        // Per-platform cooldown, measured from the last completed run.
        let state = platform_state(queue, platform).await?;
        if let Some(done) = state.last_completed_at {
            if (now - done).num_milliseconds() < settings.same_platform_cooldown_ms as i64 {
                return Ok(false);
            }
        }

        // Global spacing between any two emissions.
        if let Some(last) = last_enqueue_at(queue).await? {
            if (now - last).num_milliseconds() < settings.inter_platform_delay_ms as i64 {
                return Ok(false);
            }
        }

        let sale_state = if state.on_sale_counter < settings.on_sale_ratio {
            SaleState::OnSale
        } else {
            SaleState::OffSale
        };

        let config = self.platforms.get(platform);
        let workflow_id = config
            .as_ref()
            .map(|c| c.workflow_id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| settings.validation_workflow.clone());
        let link_url_pattern = config
            .as_ref()
            .map(|c| c.link_url_pattern.clone())
            .filter(|p| !p.is_empty());

        let mut params = Map::new();
        params.insert("platform".to_string(), json!(platform));
        params.insert("sale_state".to_string(), json!(sale_state));
        params.insert(
            "link_url_pattern".to_string(),
            link_url_pattern.map_or(Value::Null, Value::String),
        );
        let mut metadata = Map::new();
        metadata.insert("scheduled".to_string(), json!(true));

        let job = Job::builder()
            .workflow_id(workflow_id)
            .platform(platform)
            .priority(settings.priority)
            .params(params)
            .metadata(metadata)
            .build();

        queue.enqueue(platform, &job).await?;
        stamp_last_enqueue(queue, now).await?;

        let mut next_state = state;
        if sale_state == SaleState::OnSale {
            next_state.on_sale_counter =
                (next_state.on_sale_counter + 1).min(settings.on_sale_ratio);
        } else {
            next_state.on_sale_counter = 0;
        }
        save_platform_state(queue, platform, &next_state).await?;

        info!(
            platform,
            job_id = %job.id,
            sale_state = %sale_state,
            "scheduled validation job"
        );
        Ok(true)
    }
}
