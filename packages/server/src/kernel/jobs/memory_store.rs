//! In-memory queue store used by tests and local development.
//!
//! Preserves the ordering semantics of the Redis store (priority
//! descending, id ascending) so scheduler and worker behavior can be
//! exercised without external infrastructure. TTLs are not enforced.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::job::{Job, JobStatus};
use super::store::{QueueResult, QueueStore};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    neg_priority: i64,
    id: String,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, BTreeSet<QueueEntry>>,
    jobs: HashMap<Uuid, Job>,
    running: HashSet<Uuid>,
    kv: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryQueueStore {
    inner: Mutex<Inner>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, platform: &str, job: &Job) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job.id, job.clone());
        inner
            .queues
            .entry(platform.to_string())
            .or_default()
            .insert(QueueEntry {
                neg_priority: -i64::from(job.priority),
                id: job.id.to_string(),
            });
        Ok(())
    }

    async fn dequeue(&self, platform: &str, timeout: Duration) -> QueueResult<Option<Job>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                let entry = inner
                    .queues
                    .get_mut(platform)
                    .and_then(|queue| queue.pop_first());
                if let Some(entry) = entry {
                    if let Ok(job_id) = Uuid::parse_str(&entry.id) {
                        inner.running.insert(job_id);
                        if let Some(job) = inner.jobs.get(&job_id) {
                            return Ok(Some(job.clone()));
                        }
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    async fn get(&self, job_id: Uuid) -> QueueResult<Option<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&job_id).cloned())
    }

    async fn update(&self, job: &Job) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn heartbeat(&self, _job_id: Uuid) -> QueueResult<()> {
        Ok(())
    }

    async fn finish(&self, job_id: Uuid) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.running.remove(&job_id);
        Ok(())
    }

    async fn list_running(&self) -> QueueResult<Vec<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .running
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect())
    }

    async fn queue_depth(&self, platform: &str) -> QueueResult<usize> {
        let inner = self.inner.lock().await;
        Ok(inner.queues.get(platform).map_or(0, BTreeSet::len))
    }

    async fn clear(&self, platform: &str) -> QueueResult<usize> {
        let mut inner = self.inner.lock().await;
        let entries = inner
            .queues
            .remove(platform)
            .unwrap_or_default();
        let count = entries.len();
        for entry in entries {
            if let Ok(job_id) = Uuid::parse_str(&entry.id) {
                if let Some(job) = inner.jobs.get_mut(&job_id) {
                    job.status = JobStatus::Cancelled;
                }
            }
        }
        Ok(count)
    }

    async fn health(&self) -> bool {
        true
    }

    async fn get_raw(&self, key: &str) -> QueueResult<Option<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.kv.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: &str, _ttl: Option<Duration>) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_raw(&self, key: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.kv.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_for(platform: &str, priority: i32) -> Job {
        Job::builder()
            .workflow_id("product_validation")
            .platform(platform)
            .priority(priority)
            .build()
    }

    #[tokio::test]
    async fn dequeue_returns_highest_priority_first() {
        let store = MemoryQueueStore::new();
        let low = job_for("hwahae", 0);
        let high = job_for("hwahae", 10);
        store.enqueue("hwahae", &low).await.unwrap();
        store.enqueue("hwahae", &high).await.unwrap();

        let first = store
            .dequeue("hwahae", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, high.id);
    }

    #[tokio::test]
    async fn equal_priorities_drain_in_creation_order() {
        let store = MemoryQueueStore::new();
        let first = job_for("hwahae", 5);
        let second = job_for("hwahae", 5);
        store.enqueue("hwahae", &second).await.unwrap();
        store.enqueue("hwahae", &first).await.unwrap();

        let popped = store
            .dequeue("hwahae", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.id, first.id);
    }

    #[tokio::test]
    async fn dequeue_times_out_on_empty_queue() {
        let store = MemoryQueueStore::new();
        let popped = store
            .dequeue("hwahae", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn dequeued_job_appears_in_running_set() {
        let store = MemoryQueueStore::new();
        let job = job_for("hwahae", 0);
        store.enqueue("hwahae", &job).await.unwrap();
        store
            .dequeue("hwahae", Duration::from_millis(10))
            .await
            .unwrap();

        let running = store.list_running().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, job.id);

        store.finish(job.id).await.unwrap();
        assert!(store.list_running().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_cancels_pending_jobs() {
        let store = MemoryQueueStore::new();
        let job = job_for("ably", 0);
        store.enqueue("ably", &job).await.unwrap();

        let cleared = store.clear("ably").await.unwrap();
        assert_eq!(cleared, 1);
        assert_eq!(store.queue_depth("ably").await.unwrap(), 0);
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
    }
}
