//! Redis-backed queue store.
//!
//! Pending queues are sorted sets scored by negated priority so that
//! `BZPOPMIN` pops the highest priority first; equal priorities tie-break
//! on the member id, and time-ordered ids make that creation order.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;
use uuid::Uuid;

use super::job::{Job, JobStatus};
use super::store::{keys, QueueError, QueueResult, QueueStore, RUNNING_LEASE_TTL};

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

pub struct RedisQueueStore {
    manager: ConnectionManager,
}

impl RedisQueueStore {
    /// Connect to the queue store. The connection manager reconnects
    /// transparently, so later round trips surface transient errors
    /// instead of permanently poisoning the handle.
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(url).map_err(QueueError::from)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    fn score(priority: i32) -> f64 {
        -f64::from(priority)
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn enqueue(&self, platform: &str, job: &Job) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.conn();
        let _: () = conn.set(keys::job(job.id), &payload).await?;
        let _: () = conn
            .zadd(
                keys::queue(platform),
                job.id.to_string(),
                Self::score(job.priority),
            )
            .await?;
        Ok(())
    }

    async fn dequeue(&self, platform: &str, timeout: Duration) -> QueueResult<Option<Job>> {
        let mut conn = self.conn();
        let popped: Option<(String, String, f64)> = redis::cmd("BZPOPMIN")
            .arg(keys::queue(platform))
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;

        let Some((_, member, _)) = popped else {
            return Ok(None);
        };
        let job_id = Uuid::parse_str(&member)
            .map_err(|_| QueueError::Corrupt(format!("queue member is not a job id: {member}")))?;

        let raw: Option<String> = conn.get(keys::job(job_id)).await?;
        let Some(raw) = raw else {
            warn!(job_id = %job_id, platform, "queued job record vanished before lease");
            return Ok(None);
        };
        let job: Job = serde_json::from_str(&raw)?;

        let _: () = conn
            .set_ex(keys::running(job_id), &raw, RUNNING_LEASE_TTL.as_secs())
            .await?;
        Ok(Some(job))
    }

    async fn get(&self, job_id: Uuid) -> QueueResult<Option<Job>> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(keys::job(job_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, job: &Job) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.conn();
        let _: () = conn.set(keys::job(job.id), &payload).await?;
        // Refresh the lease copy only while the job is actually leased.
        let _: Option<String> = redis::cmd("SET")
            .arg(keys::running(job.id))
            .arg(&payload)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn heartbeat(&self, job_id: Uuid) -> QueueResult<()> {
        let mut conn = self.conn();
        let _: bool = conn
            .expire(keys::running(job_id), RUNNING_LEASE_TTL.as_secs() as i64)
            .await?;
        Ok(())
    }

    async fn finish(&self, job_id: Uuid) -> QueueResult<()> {
        let mut conn = self.conn();
        let _: () = conn.del(keys::running(job_id)).await?;
        Ok(())
    }

    async fn list_running(&self) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn();
        let mut running_keys = Vec::new();
        {
            let mut iter: redis::AsyncIter<'_, String> = conn.scan_match("running:*").await?;
            while let Some(key) = iter.next_item().await {
                running_keys.push(key);
            }
        }

        let mut conn = self.conn();
        let mut jobs = Vec::with_capacity(running_keys.len());
        for key in running_keys {
            let raw: Option<String> = conn.get(&key).await?;
            if let Some(raw) = raw {
                match serde_json::from_str(&raw) {
                    Ok(job) => jobs.push(job),
                    Err(e) => warn!(key = %key, error = %e, "skipping unreadable running entry"),
                }
            }
        }
        Ok(jobs)
    }

    async fn queue_depth(&self, platform: &str) -> QueueResult<usize> {
        let mut conn = self.conn();
        let depth: usize = conn.zcard(keys::queue(platform)).await?;
        Ok(depth)
    }

    async fn clear(&self, platform: &str) -> QueueResult<usize> {
        let mut conn = self.conn();
        let members: Vec<String> = conn.zrange(keys::queue(platform), 0, -1).await?;
        let _: () = conn.del(keys::queue(platform)).await?;

        for member in &members {
            let Ok(job_id) = Uuid::parse_str(member) else {
                continue;
            };
            if let Some(mut job) = self.get(job_id).await? {
                job.status = JobStatus::Cancelled;
                self.update(&job).await?;
            }
        }
        Ok(members.len())
    }

    async fn health(&self) -> bool {
        let mut conn = self.conn();
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        matches!(pong.as_deref(), Ok("PONG"))
    }

    async fn get_raw(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Option<Duration>) -> QueueResult<()> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete_raw(&self, key: &str) -> QueueResult<()> {
        let mut conn = self.conn();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
