//! Shared dependency container threaded through node execution.
//!
//! External collaborators sit behind traits so nodes and stages can be
//! exercised against in-memory doubles.

use std::path::PathBuf;
use std::sync::Arc;

use crate::domains::catalog::CatalogStore;
use crate::domains::notify::Notifier;
use crate::domains::platforms::config::PlatformCatalog;
use crate::domains::platforms::fetch::SnapshotFetcher;
use crate::kernel::jobs::QueueStore;
use crate::kernel::workflow::WorkflowLoader;

pub struct ServerDeps {
    pub queue: Arc<dyn QueueStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub platforms: Arc<PlatformCatalog>,
    pub workflows: Arc<WorkflowLoader>,
    pub fetcher: Arc<dyn SnapshotFetcher>,
    pub notifier: Arc<dyn Notifier>,
    /// Plain HTTP client for lightweight check nodes.
    pub http: reqwest::Client,
    /// Root directory for per-run audit logs.
    pub audit_root: PathBuf,
}

impl ServerDeps {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn QueueStore>,
        catalog: Arc<dyn CatalogStore>,
        platforms: Arc<PlatformCatalog>,
        workflows: Arc<WorkflowLoader>,
        fetcher: Arc<dyn SnapshotFetcher>,
        notifier: Arc<dyn Notifier>,
        audit_root: PathBuf,
    ) -> Self {
        Self {
            queue,
            catalog,
            platforms,
            workflows,
            fetcher,
            notifier,
            http: reqwest::Client::new(),
            audit_root,
        }
    }
}
