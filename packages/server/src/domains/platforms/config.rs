//! Platform configuration loaded from YAML.
//!
//! The same file drives scraping and reconciliation: navigation and
//! extraction sections are opaque to the core and handed to the fetch
//! stage verbatim; `update_exclusions` is the one section the core
//! interprets itself.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// Fields that must never be written back to the source of record.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ExclusionPolicy {
    #[serde(default)]
    pub skip_fields: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

impl ExclusionPolicy {
    pub fn is_excluded(&self, field: &str) -> bool {
        self.skip_fields.iter().any(|f| f == field)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimits {
    /// Pause between successive item fetches on the same platform.
    #[serde(default)]
    pub per_item_delay_ms: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_item_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub rate_limits: RateLimits,
    /// Opaque navigation steps for the browser fetcher.
    #[serde(default)]
    pub navigation: Vec<Value>,
    /// Opaque extraction directives (endpoints, pointers, selectors).
    #[serde(default)]
    pub extraction: Value,
    #[serde(default)]
    pub update_exclusions: ExclusionPolicy,
    /// Pattern matching this platform's product link URLs; passed to
    /// scheduled jobs as `link_url_pattern`.
    #[serde(default)]
    pub link_url_pattern: String,
    /// Validation workflow for this platform; the scheduler falls back to
    /// the global default when empty.
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub desktop_detection: Option<Value>,
    #[serde(default)]
    pub url_transformation: Option<Value>,
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    pub inter_platform_delay_ms: u64,
    pub same_platform_cooldown_ms: u64,
    /// On-sale emissions between each off-sale emission (ratio R).
    #[serde(default = "default_on_sale_ratio")]
    pub on_sale_ratio: u32,
    /// Ordered platform list the scheduler walks each tick.
    pub platforms: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_validation_workflow")]
    pub validation_workflow: String,
}

fn default_tick_ms() -> u64 {
    1_000
}

fn default_on_sale_ratio() -> u32 {
    4
}

fn default_validation_workflow() -> String {
    "product_validation".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherTaskSettings {
    pub name: String,
    pub workflow_id: String,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatcherSettings {
    #[serde(default)]
    pub tasks: Vec<WatcherTaskSettings>,
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    scheduler: SchedulerSettings,
    #[serde(default)]
    watcher: WatcherSettings,
    platforms: HashMap<String, PlatformConfig>,
}

/// All per-platform configuration plus the scheduler/watcher sections.
#[derive(Debug)]
pub struct PlatformCatalog {
    pub scheduler: SchedulerSettings,
    pub watcher: WatcherSettings,
    platforms: HashMap<String, Arc<PlatformConfig>>,
}

impl PlatformCatalog {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let raw: RawCatalog = serde_yaml::from_str(raw).context("platform config invalid")?;
        Ok(Self {
            scheduler: raw.scheduler,
            watcher: raw.watcher,
            platforms: raw
                .platforms
                .into_iter()
                .map(|(tag, config)| (tag, Arc::new(config)))
                .collect(),
        })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_yaml(&raw)
    }

    pub fn get(&self, platform: &str) -> Option<Arc<PlatformConfig>> {
        self.platforms.get(platform).cloned()
    }

    pub fn exclusions(&self, platform: &str) -> ExclusionPolicy {
        self.platforms
            .get(platform)
            .map(|config| config.update_exclusions.clone())
            .unwrap_or_default()
    }
}
