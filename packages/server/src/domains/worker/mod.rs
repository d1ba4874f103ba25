//! Per-platform queue consumers.
//!
//! One long-running worker drains each platform queue sequentially: lease
//! a job, load its workflow, hand it to the DAG engine, stamp the
//! platform's completion time, continue. Workers never retry a whole job;
//! retries belong to the engine's per-node policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domains::scheduler;
use crate::domains::scheduler::watcher::ALERT_PLATFORM;
use crate::kernel::jobs::{Job, JobError, JobStatus};
use crate::kernel::workflow::WorkflowEngine;
use crate::kernel::ServerDeps;

const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(5);
const LEASE_HEARTBEAT_EVERY: Duration = Duration::from_secs(20);

pub struct PlatformWorker {
    platform: String,
    engine: Arc<WorkflowEngine>,
    deps: Arc<ServerDeps>,
    shutdown: Arc<AtomicBool>,
}

impl PlatformWorker {
    pub fn new(
        platform: impl Into<String>,
        engine: Arc<WorkflowEngine>,
        deps: Arc<ServerDeps>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            platform: platform.into(),
            engine,
            deps,
            shutdown,
        }
    }

    pub async fn run(self) {
        info!(platform = %self.platform, "worker starting");
        let mut backoff = Duration::from_secs(1);

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.deps.queue.dequeue(&self.platform, DEQUEUE_TIMEOUT).await {
                Ok(Some(job)) => {
                    backoff = Duration::from_secs(1);
                    self.process(job).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(platform = %self.platform, error = %e, "dequeue failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                }
            }
        }
        info!(platform = %self.platform, "worker stopped");
    }

    async fn process(&self, job: Job) {
        let job_id = job.id;
        let platform = job.platform.clone();
        debug!(job_id = %job_id, workflow_id = %job.workflow_id, "processing job");

        let definition = match self.deps.workflows.load(&job.workflow_id).await {
            Ok(definition) => definition,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "workflow definition unavailable");
                self.fail_without_run(job, &e.to_string()).await;
                self.after_run(job_id, &platform).await;
                return;
            }
        };

        // Keep the lease alive while the DAG runs.
        let heartbeat = {
            let queue = self.deps.queue.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(LEASE_HEARTBEAT_EVERY);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if let Err(e) = queue.heartbeat(job_id).await {
                        warn!(job_id = %job_id, error = %e, "lease heartbeat failed");
                    }
                }
            })
        };

        match self.engine.execute(&definition, job).await {
            Ok(job) => info!(job_id = %job.id, platform = %platform, "job completed"),
            Err(e) => warn!(job_id = %job_id, platform = %platform, error = %e, "job failed"),
        }
        heartbeat.abort();
        self.after_run(job_id, &platform).await;
    }

    async fn after_run(&self, job_id: Uuid, platform: &str) {
        if let Err(e) = self.deps.queue.finish(job_id).await {
            warn!(job_id = %job_id, error = %e, "failed to drop running entry");
        }
        if let Err(e) =
            scheduler::mark_platform_completed(self.deps.queue.as_ref(), platform).await
        {
            warn!(platform, error = %e, "failed to stamp platform completion");
        }
    }

    /// Finalize a job that never reached the engine.
    async fn fail_without_run(&self, mut job: Job, message: &str) {
        job.status = JobStatus::Failed;
        job.error = Some(JobError {
            message: message.to_string(),
            node_id: "unknown".to_string(),
            timestamp: Utc::now(),
        });
        job.completed_at = Some(Utc::now());
        if let Err(e) = self.deps.queue.update(&job).await {
            error!(job_id = %job.id, error = %e, "failed to persist job failure");
        }
    }
}

pub struct WorkerFleet;

impl WorkerFleet {
    /// One worker per scheduled platform, plus the `alert` and `default`
    /// queues.
    pub fn spawn(
        engine: Arc<WorkflowEngine>,
        deps: Arc<ServerDeps>,
        shutdown: Arc<AtomicBool>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let mut platforms: Vec<String> = deps.platforms.scheduler.platforms.clone();
        for extra in [ALERT_PLATFORM, "default"] {
            if !platforms.iter().any(|p| p == extra) {
                platforms.push(extra.to_string());
            }
        }

        platforms
            .into_iter()
            .map(|platform| {
                let worker =
                    PlatformWorker::new(platform, engine.clone(), deps.clone(), shutdown.clone());
                tokio::spawn(worker.run())
            })
            .collect()
    }
}
