//! Shared helpers for integration tests.
//!
//! Everything runs against in-memory doubles: the memory queue store, the
//! memory catalog, and a closure-backed fetcher. No network, browser, or
//! database is required.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use shelfwatch_core::common::{ProductSnapshot, SaleState};
use shelfwatch_core::domains::catalog::{CatalogStore, MemoryCatalog, ProductRecord};
use shelfwatch_core::domains::notify::LogNotifier;
use shelfwatch_core::domains::platforms::config::{PlatformCatalog, PlatformConfig};
use shelfwatch_core::domains::platforms::fetch::{FetchOutcome, SnapshotFetcher};
use shelfwatch_core::kernel::jobs::{MemoryQueueStore, QueueStore};
use shelfwatch_core::kernel::workflow::WorkflowLoader;
use shelfwatch_core::kernel::ServerDeps;

pub const TEST_PLATFORMS_YAML: &str = r#"
scheduler:
  tick_ms: 10
  inter_platform_delay_ms: 0
  same_platform_cooldown_ms: 0
  on_sale_ratio: 4
  platforms: [hwahae]
watcher:
  tasks:
    - name: banner
      workflow_id: banner_check
      interval_ms: 60000
platforms:
  hwahae:
    base_url: https://www.hwahae.co.kr
    link_url_pattern: "https://www.hwahae.co.kr/goods/*"
    rate_limits:
      per_item_delay_ms: 0
"#;

pub fn test_catalog_config() -> Arc<PlatformCatalog> {
    Arc::new(PlatformCatalog::from_yaml(TEST_PLATFORMS_YAML).unwrap())
}

pub fn platform_catalog(yaml: &str) -> Arc<PlatformCatalog> {
    Arc::new(PlatformCatalog::from_yaml(yaml).unwrap())
}

/// Closure-backed fetcher double.
pub struct FnFetcher(
    pub Box<dyn Fn(&ProductRecord) -> Result<FetchOutcome> + Send + Sync>,
);

impl FnFetcher {
    pub fn fixed(outcome: FetchOutcome) -> Arc<Self> {
        Arc::new(Self(Box::new(move |_| Ok(outcome.clone()))))
    }
}

#[async_trait]
impl SnapshotFetcher for FnFetcher {
    async fn fetch(
        &self,
        product: &ProductRecord,
        _config: &PlatformConfig,
    ) -> Result<FetchOutcome> {
        (self.0)(product)
    }
}

pub struct TestWorld {
    pub queue: Arc<MemoryQueueStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub deps: Arc<ServerDeps>,
    pub audit_root: tempfile::TempDir,
    pub workflows_dir: tempfile::TempDir,
}

/// Build a deps container wired to in-memory doubles.
pub fn test_world(fetcher: Arc<dyn SnapshotFetcher>) -> TestWorld {
    test_world_with(test_catalog_config(), fetcher)
}

pub fn test_world_with(
    platforms: Arc<PlatformCatalog>,
    fetcher: Arc<dyn SnapshotFetcher>,
) -> TestWorld {
    let queue = Arc::new(MemoryQueueStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let audit_root = tempfile::tempdir().unwrap();
    let workflows_dir = tempfile::tempdir().unwrap();

    let deps = Arc::new(ServerDeps::new(
        queue.clone() as Arc<dyn QueueStore>,
        catalog.clone() as Arc<dyn CatalogStore>,
        platforms,
        Arc::new(WorkflowLoader::new(workflows_dir.path())),
        fetcher,
        Arc::new(LogNotifier),
        PathBuf::from(audit_root.path()),
    ));

    TestWorld {
        queue,
        catalog,
        deps,
        audit_root,
        workflows_dir,
    }
}

pub fn product(set: i64, id: i64, sale_status: SaleState) -> ProductRecord {
    ProductRecord {
        product_set_id: set,
        product_id: id,
        platform: "hwahae".into(),
        link_url: format!("https://www.hwahae.co.kr/goods/{id}"),
        product_name: "A".into(),
        thumbnail: "T".into(),
        original_price: 20000,
        discounted_price: 16000,
        sale_status,
        updated_at: Utc::now(),
    }
}

pub fn snapshot_of(record: &ProductRecord) -> ProductSnapshot {
    ProductSnapshot {
        name: record.product_name.clone(),
        thumbnail: record.thumbnail.clone(),
        original_price: record.original_price,
        discounted_price: record.discounted_price,
        sale_status: record.sale_status,
    }
}
