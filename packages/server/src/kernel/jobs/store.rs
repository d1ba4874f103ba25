//! Queue store contract over the shared keyspace.
//!
//! The queue store is the only cross-process mutable shared state: pending
//! jobs per platform, leased job records, and the scheduler/watcher control
//! keys all live behind this trait.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::job::Job;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The store is unreachable or a round trip failed. Callers retry
    /// idempotent reads with backoff.
    #[error("queue store unavailable: {0}")]
    Unavailable(String),
    /// A payload could not be encoded or decoded.
    #[error("queue payload invalid: {0}")]
    Serde(#[from] serde_json::Error),
    /// A queue entry that should resolve to a job record did not.
    #[error("queue entry invalid: {0}")]
    Corrupt(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Keyspace shared by the scheduler, workers, watcher and control surface.
pub mod keys {
    use uuid::Uuid;

    pub fn queue(platform: &str) -> String {
        format!("queue:{platform}")
    }

    pub fn job(id: Uuid) -> String {
        format!("job:{id}")
    }

    pub fn running(id: Uuid) -> String {
        format!("running:{id}")
    }

    pub const SCHEDULER_LAST_ENQUEUE_AT: &str = "scheduler:last_enqueue_at";
    pub const SCHEDULER_ENABLED: &str = "scheduler:enabled";
    pub const SCHEDULER_HEARTBEAT_AT: &str = "scheduler:heartbeat_at";

    pub fn scheduler_state(platform: &str) -> String {
        format!("scheduler:state:{platform}")
    }

    pub const WATCHER_ENABLED: &str = "watcher:enabled";
    pub const WATCHER_HEARTBEAT_AT: &str = "watcher:heartbeat_at";

    pub fn watcher_state(task: &str) -> String {
        format!("watcher:state:{task}")
    }
}

/// TTLs protecting shared keys from stale cooldown holds after a crash.
pub const GLOBAL_SPACING_TTL: Duration = Duration::from_secs(3_600);
pub const PLATFORM_STATE_TTL: Duration = Duration::from_secs(86_400);
/// Lease on a running-set entry; refreshed by worker heartbeats.
pub const RUNNING_LEASE_TTL: Duration = Duration::from_secs(3_600);

/// Contract over the external ordered-list + key-value store.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Priority-ordered push onto the platform queue. Within a platform,
    /// jobs drain priority-descending, id-ascending.
    async fn enqueue(&self, platform: &str, job: &Job) -> QueueResult<()>;

    /// Blocking pop with a server-side wait up to `timeout`. The returned
    /// job is simultaneously moved to the running set under a lease.
    async fn dequeue(&self, platform: &str, timeout: Duration) -> QueueResult<Option<Job>>;

    async fn get(&self, job_id: Uuid) -> QueueResult<Option<Job>>;

    /// Rewrite the full job record at the job-id key. Emits no events.
    async fn update(&self, job: &Job) -> QueueResult<()>;

    /// Refresh the lease on a running job.
    async fn heartbeat(&self, job_id: Uuid) -> QueueResult<()>;

    /// Drop the running-set entry once a job is finalized.
    async fn finish(&self, job_id: Uuid) -> QueueResult<()>;

    async fn list_running(&self) -> QueueResult<Vec<Job>>;

    async fn queue_depth(&self, platform: &str) -> QueueResult<usize>;

    /// Remove all pending jobs for a platform, marking them cancelled.
    /// Returns how many were removed.
    async fn clear(&self, platform: &str) -> QueueResult<usize>;

    async fn health(&self) -> bool;

    /// Small-value reads/writes for scheduler and watcher state keys.
    async fn get_raw(&self, key: &str) -> QueueResult<Option<String>>;
    async fn set_raw(&self, key: &str, value: &str, ttl: Option<Duration>) -> QueueResult<()>;
    async fn delete_raw(&self, key: &str) -> QueueResult<()>;
}
