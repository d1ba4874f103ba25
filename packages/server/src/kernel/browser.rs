//! Headless-browser pool.
//!
//! A bounded pool of Chromium handles (default size 1, to throttle site
//! load). Each handle tracks rotation counters: after enough page uses the
//! page is destroyed and re-created, after enough page rotations the whole
//! browser is relaunched to mitigate renderer drift. A consecutive-failure
//! circuit breaker destroys handles that keep failing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser pool is closed")]
    Closed,
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("browser rpc failed: {0}")]
    Cdp(String),
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        BrowserError::Cdp(err.to_string())
    }
}

/// Rotation thresholds for a pooled handle.
#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    /// Page uses before the page is destroyed and re-created.
    pub page_rotation_threshold: u32,
    /// Page rotations before the whole browser is relaunched.
    pub context_rotation_threshold: u32,
    /// Sequential scrape failures before the handle is destroyed.
    pub max_consecutive_failures: u32,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            page_rotation_threshold: 20,
            context_rotation_threshold: 5,
            max_consecutive_failures: 3,
        }
    }
}

/// Per-handle usage counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandleCounters {
    pub page_uses: u32,
    pub context_rotations: u32,
    pub consecutive_failures: u32,
}

impl HandleCounters {
    pub fn record(&mut self, success: bool) {
        self.page_uses += 1;
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }

    pub fn rotated_page(&mut self) {
        self.page_uses = 0;
        self.context_rotations += 1;
    }

    pub fn needs_page_rotation(&self, policy: &RotationPolicy) -> bool {
        self.page_uses >= policy.page_rotation_threshold
    }

    pub fn needs_destroy(&self, policy: &RotationPolicy) -> bool {
        self.consecutive_failures >= policy.max_consecutive_failures
            || self.context_rotations >= policy.context_rotation_threshold
    }
}

#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    pub size: usize,
    pub policy: RotationPolicy,
    pub launch_args: Vec<String>,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            size: 1,
            policy: RotationPolicy::default(),
            launch_args: vec![
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
            ],
        }
    }
}

struct PooledBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
    counters: HandleCounters,
}

impl PooledBrowser {
    async fn destroy(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "browser close failed");
        }
        self.handler_task.abort();
    }
}

/// A leased handle. Must be returned with [`BrowserPool::release`]; release
/// is idempotent and dropping an unreleased lease destroys the handle.
pub struct BrowserLease {
    slot: Option<PooledBrowser>,
    permit: Option<OwnedSemaphorePermit>,
}

impl BrowserLease {
    /// The handle's current page; `None` once the lease was released.
    pub fn page(&self) -> Option<&Page> {
        self.slot.as_ref().map(|slot| &slot.page)
    }

    pub fn note_success(&mut self) {
        if let Some(slot) = self.slot.as_mut() {
            slot.counters.record(true);
        }
    }

    pub fn note_failure(&mut self) {
        if let Some(slot) = self.slot.as_mut() {
            slot.counters.record(false);
        }
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            // Lease escaped without release; close the browser off-task.
            tokio::spawn(async move { slot.destroy().await });
        }
    }
}

pub struct BrowserPool {
    config: BrowserPoolConfig,
    idle: Mutex<Vec<PooledBrowser>>,
    slots: Arc<Semaphore>,
    closed: AtomicBool,
}

impl BrowserPool {
    /// Build the pool without launching anything; browsers launch lazily
    /// on first acquire.
    pub fn new(config: BrowserPoolConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.size.max(1)));
        Self {
            config,
            idle: Mutex::new(Vec::new()),
            slots,
            closed: AtomicBool::new(false),
        }
    }

    /// Lease a handle, blocking until one is free.
    pub async fn acquire(&self) -> Result<BrowserLease, BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BrowserError::Closed)?;

        let slot = match self.idle.lock().await.pop() {
            Some(slot) => slot,
            None => self.launch().await?,
        };

        Ok(BrowserLease {
            slot: Some(slot),
            permit: Some(permit),
        })
    }

    /// Return a lease to the pool, applying rotation and circuit-breaker
    /// discipline. Calling release twice on the same lease is a no-op.
    pub async fn release(&self, lease: &mut BrowserLease) {
        let Some(mut slot) = lease.slot.take() else {
            return;
        };
        let permit = lease.permit.take();

        if self.closed.load(Ordering::SeqCst) || slot.counters.needs_destroy(&self.config.policy) {
            debug!(
                failures = slot.counters.consecutive_failures,
                context_rotations = slot.counters.context_rotations,
                "destroying browser handle"
            );
            slot.destroy().await;
        } else {
            if slot.counters.needs_page_rotation(&self.config.policy) {
                match self.rotate_page(&mut slot).await {
                    Ok(()) => slot.counters.rotated_page(),
                    Err(e) => {
                        warn!(error = %e, "page rotation failed; destroying handle");
                        slot.destroy().await;
                        drop(permit);
                        return;
                    }
                }
            }
            self.idle.lock().await.push(slot);
        }
        drop(permit);
    }

    /// Drain and destroy every idle handle; subsequent acquires fail fast.
    pub async fn cleanup(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.slots.close();
        let drained: Vec<PooledBrowser> = self.idle.lock().await.drain(..).collect();
        for slot in drained {
            slot.destroy().await;
        }
    }

    async fn launch(&self) -> Result<PooledBrowser, BrowserError> {
        let config = BrowserConfig::builder()
            .args(self.config.launch_args.iter().map(String::as_str))
            .build()
            .map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        let page = browser.new_page("about:blank").await?;

        debug!("launched browser handle");
        Ok(PooledBrowser {
            browser,
            handler_task,
            page,
            counters: HandleCounters::default(),
        })
    }

    async fn rotate_page(&self, slot: &mut PooledBrowser) -> Result<(), BrowserError> {
        let fresh = slot.browser.new_page("about:blank").await?;
        let stale = std::mem::replace(&mut slot.page, fresh);
        if let Err(e) = stale.close().await {
            warn!(error = %e, "stale page close failed");
        }
        Ok(())
    }
}
