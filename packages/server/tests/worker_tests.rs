//! Worker fleet behavior: leasing, completion hooks, and definition
//! failures.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map};

use common::{test_world, FnFetcher, TestWorld};
use shelfwatch_core::domains::platforms::fetch::FetchOutcome;
use shelfwatch_core::domains::scheduler;
use shelfwatch_core::domains::worker::PlatformWorker;
use shelfwatch_core::kernel::jobs::{Job, JobStatus, QueueStore};
use shelfwatch_core::kernel::workflow::{
    NodeContext, NodeOutcome, NodeRegistry, WorkflowEngine, WorkflowNode,
};

struct Succeed;

#[async_trait]
impl WorkflowNode for Succeed {
    async fn run(&self, _ctx: &NodeContext) -> NodeOutcome {
        let mut data = Map::new();
        data.insert("done".to_string(), json!(true));
        NodeOutcome::success(data)
    }
}

fn spawn_worker(world: &TestWorld) -> Arc<AtomicBool> {
    let mut registry = NodeRegistry::new();
    registry.register("ok", Succeed);
    let engine = Arc::new(WorkflowEngine::new(Arc::new(registry), world.deps.clone()));

    let shutdown = Arc::new(AtomicBool::new(false));
    let worker = PlatformWorker::new("hwahae", engine, world.deps.clone(), shutdown.clone());
    tokio::spawn(worker.run());
    shutdown
}

async fn wait_for_terminal(world: &TestWorld, job_id: uuid::Uuid) -> Option<Job> {
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(job) = world.queue.get(job_id).await.unwrap() {
            if job.is_terminal() {
                return Some(job);
            }
        }
    }
    None
}

#[tokio::test]
async fn worker_drains_a_job_to_completion_and_stamps_the_platform() {
    let world = test_world(FnFetcher::fixed(FetchOutcome::NotFound));
    let workflow = json!({
        "workflow_id": "simple",
        "name": "Simple",
        "version": "1",
        "start_node": "a",
        "nodes": {"a": {"type": "ok", "name": "A", "next_nodes": []}}
    });
    std::fs::write(
        world.workflows_dir.path().join("simple.json"),
        workflow.to_string(),
    )
    .unwrap();

    let job = Job::builder()
        .workflow_id("simple")
        .platform("hwahae")
        .build();
    let job_id = job.id;
    world.queue.enqueue("hwahae", &job).await.unwrap();

    let shutdown = spawn_worker(&world);
    let finished = wait_for_terminal(&world, job_id).await;
    shutdown.store(true, Ordering::SeqCst);

    let job = finished.expect("job never finished");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result["done"], json!(true));

    // Lease dropped and completion hook stamped.
    assert!(world.queue.list_running().await.unwrap().is_empty());
    let state = scheduler::platform_state(world.queue.as_ref(), "hwahae")
        .await
        .unwrap();
    assert!(state.last_completed_at.is_some());
}

#[tokio::test]
async fn missing_definitions_fail_the_job_without_a_run() {
    let world = test_world(FnFetcher::fixed(FetchOutcome::NotFound));

    let job = Job::builder()
        .workflow_id("ghost")
        .platform("hwahae")
        .build();
    let job_id = job.id;
    world.queue.enqueue("hwahae", &job).await.unwrap();

    let shutdown = spawn_worker(&world);
    let finished = wait_for_terminal(&world, job_id).await;
    shutdown.store(true, Ordering::SeqCst);

    let job = finished.expect("job never finalized");
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.node_id, "unknown");
    assert!(error.message.contains("not found"));
}
