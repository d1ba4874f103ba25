//! Live snapshot fetchers for the storefront platforms.
//!
//! Three platforms answer over HTTP/GraphQL, three require a headless
//! browser. Either way the extraction directives from the platform config
//! stay opaque to the rest of the core: API responses are read through
//! JSON pointers, scraped pages through CSS selectors, both as directed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::config::PlatformConfig;
use super::Platform;
use crate::common::{ProductSnapshot, SaleState};
use crate::domains::catalog::ProductRecord;
use crate::kernel::browser::{BrowserLease, BrowserPool};

/// Result of asking a storefront about one product.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Snapshot(ProductSnapshot),
    /// The platform's well-known "no such product" marker.
    NotFound,
}

#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch(&self, product: &ProductRecord, config: &PlatformConfig)
        -> Result<FetchOutcome>;
}

/// Production fetcher dispatching on the platform's fetch kind.
pub struct LiveFetcher {
    http: reqwest::Client,
    browser: Arc<BrowserPool>,
}

impl LiveFetcher {
    pub fn new(browser: Arc<BrowserPool>) -> Self {
        Self {
            http: reqwest::Client::new(),
            browser,
        }
    }

    async fn fetch_api(
        &self,
        product: &ProductRecord,
        config: &PlatformConfig,
    ) -> Result<FetchOutcome> {
        let directives: ApiDirectives = serde_json::from_value(config.extraction.clone())
            .context("extraction directives are missing api fields")?;

        let url = directives
            .endpoint
            .replace("{product_id}", &product.product_id.to_string())
            .replace("{link_url}", &product.link_url);
        debug!(platform = %product.platform, url, "fetching api snapshot");

        let request = match &directives.graphql_query {
            Some(query) => self
                .http
                .post(&url)
                .header(USER_AGENT, &config.user_agent)
                .json(&serde_json::json!({
                    "query": query,
                    "variables": { "productId": product.product_id },
                })),
            None => self.http.get(&url).header(USER_AGENT, &config.user_agent),
        };

        let response = request.send().await.context("storefront request failed")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(FetchOutcome::NotFound);
        }
        let body: Value = response
            .error_for_status()
            .context("storefront returned an error status")?
            .json()
            .await
            .context("storefront response is not JSON")?;

        if is_not_found(&body, &directives) {
            return Ok(FetchOutcome::NotFound);
        }
        Ok(FetchOutcome::Snapshot(snapshot_from_json(
            &body,
            &directives.fields,
        )?))
    }

    async fn fetch_browser(
        &self,
        product: &ProductRecord,
        config: &PlatformConfig,
    ) -> Result<FetchOutcome> {
        let directives: BrowserDirectives = serde_json::from_value(config.extraction.clone())
            .context("extraction directives are missing browser fields")?;

        let url = transform_url(&product.link_url, config.url_transformation.as_ref());
        debug!(platform = %product.platform, url, "fetching browser snapshot");

        let mut lease = self.browser.acquire().await?;
        let html = load_page(&lease, &url, &directives).await;
        match &html {
            Ok(_) => lease.note_success(),
            Err(_) => lease.note_failure(),
        }
        self.browser.release(&mut lease).await;

        snapshot_from_html(&html?, &directives)
    }
}

#[async_trait]
impl SnapshotFetcher for LiveFetcher {
    async fn fetch(
        &self,
        product: &ProductRecord,
        config: &PlatformConfig,
    ) -> Result<FetchOutcome> {
        let platform: Platform = product
            .platform
            .parse()
            .map_err(|e| anyhow!("{e}"))?;
        match platform.fetch_kind() {
            super::FetchKind::Api => self.fetch_api(product, config).await,
            super::FetchKind::Browser => self.fetch_browser(product, config).await,
            super::FetchKind::None => {
                bail!("platform {} has no storefront fetcher", product.platform)
            }
        }
    }
}

async fn load_page(
    lease: &BrowserLease,
    url: &str,
    directives: &BrowserDirectives,
) -> Result<String> {
    let page = lease
        .page()
        .ok_or_else(|| anyhow!("browser lease already released"))?;
    page.goto(url)
        .await
        .map_err(|e| anyhow!("navigation to {url} failed: {e}"))?;
    page.wait_for_navigation()
        .await
        .map_err(|e| anyhow!("navigation to {url} did not settle: {e}"))?;
    if let Some(ms) = directives.wait_ms {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
    page.content()
        .await
        .map_err(|e| anyhow!("reading page content failed: {e}"))
}

// ---------------------------------------------------------------------------
// API extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiDirectives {
    endpoint: String,
    #[serde(default)]
    graphql_query: Option<String>,
    fields: FieldPointers,
    #[serde(default)]
    not_found_pointer: Option<String>,
    #[serde(default)]
    not_found_value: Option<String>,
}

/// JSON pointers into the response body, one per verified field.
#[derive(Debug, Deserialize)]
struct FieldPointers {
    name: String,
    thumbnail: String,
    original_price: String,
    discounted_price: String,
    sale_status: String,
}

fn is_not_found(body: &Value, directives: &ApiDirectives) -> bool {
    let Some(pointer) = &directives.not_found_pointer else {
        return false;
    };
    let Some(found) = body.pointer(pointer) else {
        return false;
    };
    match &directives.not_found_value {
        Some(expected) => value_as_string(found) == *expected,
        None => found.as_bool().unwrap_or(true),
    }
}

fn snapshot_from_json(body: &Value, fields: &FieldPointers) -> Result<ProductSnapshot> {
    let name = pointer_string(body, &fields.name)
        .with_context(|| format!("name missing at {}", fields.name))?;
    let thumbnail = pointer_string(body, &fields.thumbnail).unwrap_or_default();
    let original_price = pointer_price(body, &fields.original_price)
        .with_context(|| format!("original price missing at {}", fields.original_price))?;
    let discounted_price = pointer_price(body, &fields.discounted_price)
        .with_context(|| format!("discounted price missing at {}", fields.discounted_price))?;
    let sale_raw = pointer_string(body, &fields.sale_status).unwrap_or_default();

    Ok(ProductSnapshot {
        name,
        thumbnail,
        original_price,
        discounted_price,
        sale_status: SaleState::normalize(&sale_raw),
    })
}

fn pointer_string(body: &Value, pointer: &str) -> Option<String> {
    body.pointer(pointer).map(value_as_string)
}

fn pointer_price(body: &Value, pointer: &str) -> Option<i64> {
    let value = body.pointer(pointer)?;
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Browser extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BrowserDirectives {
    #[serde(default)]
    wait_ms: Option<u64>,
    selectors: SelectorSet,
    #[serde(default)]
    not_found_selector: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SelectorSet {
    name: SelectorSpec,
    thumbnail: SelectorSpec,
    original_price: SelectorSpec,
    discounted_price: SelectorSpec,
    sale_status: SelectorSpec,
}

/// Either a bare CSS selector or a selector plus the attribute to read.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SelectorSpec {
    Css(String),
    Detailed {
        selector: String,
        #[serde(default)]
        attr: Option<String>,
    },
}

impl SelectorSpec {
    fn parts(&self) -> (&str, Option<&str>) {
        match self {
            SelectorSpec::Css(selector) => (selector, None),
            SelectorSpec::Detailed { selector, attr } => (selector, attr.as_deref()),
        }
    }
}

fn snapshot_from_html(html: &str, directives: &BrowserDirectives) -> Result<FetchOutcome> {
    let document = Html::parse_document(html);

    if let Some(selector) = &directives.not_found_selector {
        let spec = SelectorSpec::Css(selector.clone());
        if extract_text(&document, &spec).is_some() {
            return Ok(FetchOutcome::NotFound);
        }
    }

    let selectors = &directives.selectors;
    let name = extract_text(&document, &selectors.name).context("name not found in page")?;
    let thumbnail = extract_text(&document, &selectors.thumbnail).unwrap_or_default();
    let original_price = extract_text(&document, &selectors.original_price)
        .and_then(|raw| parse_price(&raw))
        .context("original price not found in page")?;
    let discounted_price = extract_text(&document, &selectors.discounted_price)
        .and_then(|raw| parse_price(&raw))
        .context("discounted price not found in page")?;
    let sale_raw = extract_text(&document, &selectors.sale_status).unwrap_or_default();

    Ok(FetchOutcome::Snapshot(ProductSnapshot {
        name,
        thumbnail,
        original_price,
        discounted_price,
        sale_status: SaleState::normalize(&sale_raw),
    }))
}

fn extract_text(document: &Html, spec: &SelectorSpec) -> Option<String> {
    let (selector_str, attr) = spec.parts();
    let selector = Selector::parse(selector_str).ok()?;
    let element = document.select(&selector).next()?;
    match attr {
        Some(attr) => element.value().attr(attr).map(str::to_string),
        None => {
            let text: String = element.text().collect();
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
    }
}

/// Strip currency symbols and separators: "20,000원" -> 20000.
fn parse_price(raw: &str) -> Option<i64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn transform_url(url: &str, transformation: Option<&Value>) -> String {
    let Some(rules) = transformation.and_then(Value::as_array) else {
        return url.to_string();
    };
    let mut out = url.to_string();
    for rule in rules {
        if let (Some(from), Some(to)) = (
            rule.get("from").and_then(Value::as_str),
            rule.get("to").and_then(Value::as_str),
        ) {
            out = out.replace(from, to);
        }
    }
    out
}
