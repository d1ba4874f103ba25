//! Scheduler admission, sale-state ratio, and watcher cycle behavior.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{platform_catalog, test_catalog_config};
use shelfwatch_core::domains::scheduler::watcher::{Watcher, ALERT_PLATFORM};
use shelfwatch_core::domains::scheduler::{
    self, mark_platform_completed, PlatformScheduler,
};
use shelfwatch_core::kernel::jobs::{JobStatus, MemoryQueueStore, QueueStore};

const DEQUEUE_WAIT: Duration = Duration::from_millis(50);

fn yaml_with(inter_delay_ms: u64, cooldown_ms: u64, ratio: u32) -> String {
    format!(
        r#"
scheduler:
  tick_ms: 10
  inter_platform_delay_ms: {inter_delay_ms}
  same_platform_cooldown_ms: {cooldown_ms}
  on_sale_ratio: {ratio}
  platforms: [hwahae, ably]
platforms:
  hwahae:
    base_url: https://www.hwahae.co.kr
    link_url_pattern: "https://www.hwahae.co.kr/goods/*"
  ably:
    base_url: https://m.a-bly.com
"#
    )
}

async fn enabled_queue() -> Arc<MemoryQueueStore> {
    let queue = Arc::new(MemoryQueueStore::new());
    scheduler::set_enabled(queue.as_ref(), true).await.unwrap();
    queue
}

#[tokio::test]
async fn disabled_scheduler_emits_nothing() {
    let queue = Arc::new(MemoryQueueStore::new());
    let scheduler = PlatformScheduler::new(queue.clone(), test_catalog_config());

    assert_eq!(scheduler.schedule_pass().await.unwrap(), 0);
    assert_eq!(queue.queue_depth("hwahae").await.unwrap(), 0);
}

#[tokio::test]
async fn ratio_emits_exactly_one_off_sale_per_cycle() {
    let queue = enabled_queue().await;
    let catalog = platform_catalog(&yaml_with(0, 0, 4));
    let scheduler = PlatformScheduler::new(queue.clone(), catalog);

    for _ in 0..10 {
        scheduler.schedule_pass().await.unwrap();
    }

    let mut states = Vec::new();
    while let Some(job) = queue.dequeue("hwahae", DEQUEUE_WAIT).await.unwrap() {
        states.push(job.param_str("sale_state").unwrap().to_string());
    }
    assert_eq!(
        states,
        vec!["on_sale", "on_sale", "on_sale", "on_sale", "off_sale",
             "on_sale", "on_sale", "on_sale", "on_sale", "off_sale"]
    );
}

#[tokio::test]
async fn global_spacing_separates_emissions() {
    let queue = enabled_queue().await;
    let catalog = platform_catalog(&yaml_with(60_000, 0, 4));
    let scheduler = PlatformScheduler::new(queue.clone(), catalog);

    // First pass admits only the first platform; the second is blocked by
    // the global spacing stamped moments earlier.
    assert_eq!(scheduler.schedule_pass().await.unwrap(), 1);
    assert_eq!(queue.queue_depth("hwahae").await.unwrap(), 1);
    assert_eq!(queue.queue_depth("ably").await.unwrap(), 0);

    // And the next pass emits nothing at all.
    assert_eq!(scheduler.schedule_pass().await.unwrap(), 0);
}

#[tokio::test]
async fn platform_cooldown_blocks_until_elapsed() {
    let queue = enabled_queue().await;
    let catalog = platform_catalog(&yaml_with(0, 60_000, 4));
    let scheduler = PlatformScheduler::new(queue.clone(), catalog);

    mark_platform_completed(queue.as_ref(), "hwahae")
        .await
        .unwrap();
    scheduler.schedule_pass().await.unwrap();

    assert_eq!(queue.queue_depth("hwahae").await.unwrap(), 0);
    // The other platform has no completion stamp and is admitted.
    assert_eq!(queue.queue_depth("ably").await.unwrap(), 1);
}

#[tokio::test]
async fn scheduled_jobs_carry_platform_params_and_metadata() {
    let queue = enabled_queue().await;
    let catalog = platform_catalog(&yaml_with(0, 0, 4));
    let scheduler = PlatformScheduler::new(queue.clone(), catalog);

    scheduler.schedule_pass().await.unwrap();
    let job = queue
        .dequeue("hwahae", DEQUEUE_WAIT)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(job.workflow_id, "product_validation");
    assert_eq!(job.param_str("platform"), Some("hwahae"));
    assert_eq!(
        job.param_str("link_url_pattern"),
        Some("https://www.hwahae.co.kr/goods/*")
    );
    assert_eq!(job.metadata["scheduled"], serde_json::json!(true));
}

#[tokio::test]
async fn stop_with_clear_drops_pending_jobs() {
    let queue = enabled_queue().await;
    let catalog = platform_catalog(&yaml_with(0, 0, 4));
    let scheduler = PlatformScheduler::new(queue.clone(), catalog.clone());

    scheduler.schedule_pass().await.unwrap();
    scheduler.schedule_pass().await.unwrap();
    assert!(queue.queue_depth("hwahae").await.unwrap() > 0);

    let cleared = scheduler::stop(queue.as_ref(), &catalog.scheduler, true)
        .await
        .unwrap();
    assert!(cleared > 0);
    assert_eq!(queue.queue_depth("hwahae").await.unwrap(), 0);
    assert!(!scheduler::is_enabled(queue.as_ref()).await.unwrap());
}

#[tokio::test]
async fn watcher_waits_for_completion_before_rescheduling() {
    let queue = Arc::new(MemoryQueueStore::new());
    let catalog = test_catalog_config();
    let watcher = Watcher::new(queue.clone(), catalog.clone());
    let task = &catalog.watcher.tasks[0];

    // First advance emits a check job.
    watcher.advance_task(task).await.unwrap();
    let mut job = queue
        .dequeue(ALERT_PLATFORM, DEQUEUE_WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.workflow_id, "banner_check");
    assert_eq!(job.param_str("check"), Some("banner"));

    // While the job is in flight nothing new is emitted.
    watcher.advance_task(task).await.unwrap();
    assert_eq!(queue.queue_depth(ALERT_PLATFORM).await.unwrap(), 0);

    // Completion reschedules interval_ms later, so the next advance still
    // emits nothing.
    job.status = JobStatus::Completed;
    queue.update(&job).await.unwrap();
    watcher.advance_task(task).await.unwrap();
    watcher.advance_task(task).await.unwrap();
    assert_eq!(queue.queue_depth(ALERT_PLATFORM).await.unwrap(), 0);
}

#[tokio::test]
async fn scheduler_status_aggregates_shared_state() {
    let queue = enabled_queue().await;
    let catalog = platform_catalog(&yaml_with(0, 0, 4));
    let scheduler = PlatformScheduler::new(queue.clone(), catalog.clone());

    scheduler.write_heartbeat().await.unwrap();
    scheduler.schedule_pass().await.unwrap();

    let status = scheduler::status(queue.as_ref(), &catalog.scheduler)
        .await
        .unwrap();
    assert!(status.enabled);
    assert!(status.heartbeat_at.is_some());
    assert!(status.last_enqueue_at.is_some());
    let depth_total: usize = status.queue_depths.values().sum();
    assert_eq!(depth_total, 2);
    assert_eq!(status.platform_states["hwahae"].on_sale_counter, 1);
}
