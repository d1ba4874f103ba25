//! Concrete node implementations for the verification pipelines.
//!
//! The product validation workflow is collect -> verify -> reconcile ->
//! report; the watcher checks are single-node workflows on the alert
//! queue. All of them go through the same typed contract and registry.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::compare::{audit_fetch_failure, compare_product};
use crate::common::SaleState;
use crate::domains::catalog::ProductRecord;
use crate::domains::notify::RunReport;
use crate::domains::reconcile::{self, ReconcileOptions};
use crate::kernel::audit::{AuditSummary, AuditWriter};
use crate::kernel::workflow::{
    NodeContext, NodeRegistry, TypedNode, TypedOutcome, ValidationResult,
};

/// Wire up every known node type.
pub fn build_node_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register_typed("collect_products", CollectProductsNode);
    registry.register_typed("verify_products", VerifyProductsNode);
    registry.register_typed("reconcile_updates", ReconcileNode);
    registry.register_typed("send_report", ReportNode);
    registry.register_typed("banner_check", BannerCheckNode);
    registry.register_typed("vote_check", VoteCheckNode);
    registry
}

// ---------------------------------------------------------------------------
// collect_products
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CollectInput {
    pub sale_state: SaleState,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub link_url_pattern: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CollectOutput {
    pub products: Vec<ProductRecord>,
    pub product_count: usize,
}

/// Pulls the slice of the catalog this run will verify.
pub struct CollectProductsNode;

const DEFAULT_COLLECT_LIMIT: i64 = 50;

#[async_trait]
impl TypedNode for CollectProductsNode {
    type Input = CollectInput;
    type Output = CollectOutput;

    fn validate(&self, input: &Self::Input) -> ValidationResult {
        match input.limit {
            Some(limit) if limit <= 0 => ValidationResult::fail("limit must be positive"),
            _ => ValidationResult::ok(),
        }
    }

    async fn execute(
        &self,
        input: Self::Input,
        ctx: &NodeContext,
    ) -> Result<TypedOutcome<Self::Output>> {
        let products = ctx
            .deps
            .catalog
            .products_for_validation(
                &ctx.platform,
                input.sale_state,
                input.link_url_pattern.as_deref(),
                input.limit.unwrap_or(DEFAULT_COLLECT_LIMIT),
            )
            .await?;

        info!(
            platform = %ctx.platform,
            sale_state = %input.sale_state,
            count = products.len(),
            "collected products for verification"
        );
        let product_count = products.len();
        Ok(TypedOutcome::new(CollectOutput {
            products,
            product_count,
        }))
    }
}

// ---------------------------------------------------------------------------
// verify_products
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct VerifyInput {}

#[derive(Debug, Serialize)]
pub struct VerifyOutput {
    pub audit_log_path: String,
    pub summary: AuditSummary,
}

/// Fetches a live snapshot per collected product, compares the five
/// fields, and streams each result into the run's audit log.
pub struct VerifyProductsNode;

#[async_trait]
impl TypedNode for VerifyProductsNode {
    type Input = VerifyInput;
    type Output = VerifyOutput;

    async fn execute(
        &self,
        _input: Self::Input,
        ctx: &NodeContext,
    ) -> Result<TypedOutcome<Self::Output>> {
        let products: Vec<ProductRecord> = match ctx.state_value("products") {
            Some(value) => serde_json::from_value(value.clone())
                .context("accumulated products are malformed")?,
            None => bail!("no products collected before verification"),
        };
        let config = ctx
            .platform_config
            .clone()
            .ok_or_else(|| anyhow!("no platform config for {}", ctx.platform))?;

        let mut writer = AuditWriter::new(
            &ctx.deps.audit_root,
            &ctx.platform,
            ctx.job_id,
            &ctx.workflow_id,
        );
        writer.initialize().await?;

        let delay = Duration::from_millis(config.rate_limits.per_item_delay_ms);
        let total = products.len();
        for (index, product) in products.iter().enumerate() {
            let record = match ctx.deps.fetcher.fetch(product, &config).await {
                Ok(outcome) => compare_product(product, &outcome),
                Err(e) => {
                    warn!(
                        platform = %ctx.platform,
                        product_id = product.product_id,
                        error = %e,
                        "snapshot fetch failed"
                    );
                    audit_fetch_failure(product)
                }
            };
            if let Err(e) = writer.append(&record).await {
                writer.cleanup().await;
                return Err(anyhow!("audit append failed: {e}"));
            }
            if index + 1 < total && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let summary = writer.finalize().await?;
        Ok(TypedOutcome::new(VerifyOutput {
            audit_log_path: writer.path().display().to_string(),
            summary,
        }))
    }
}

// ---------------------------------------------------------------------------
// reconcile_updates
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReconcileInput {
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub batch_delay_ms: Option<u64>,
    #[serde(default)]
    pub verify_sample_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ReconcileOutput {
    pub planned_updates: usize,
    pub updates_applied: u64,
    pub update_errors: Vec<String>,
    pub verification_passed: Option<bool>,
}

/// Drives the reconciliation stage over this run's audit log.
pub struct ReconcileNode;

#[async_trait]
impl TypedNode for ReconcileNode {
    type Input = ReconcileInput;
    type Output = ReconcileOutput;

    async fn execute(
        &self,
        input: Self::Input,
        ctx: &NodeContext,
    ) -> Result<TypedOutcome<Self::Output>> {
        let path = ctx
            .state_value("audit_log_path")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("no audit log path in accumulated state"))?
            .to_string();

        let defaults = ReconcileOptions::default();
        let opts = ReconcileOptions {
            batch_size: input.batch_size.unwrap_or(defaults.batch_size),
            batch_delay: input
                .batch_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_delay),
            verify_sample_size: input
                .verify_sample_size
                .unwrap_or(defaults.verify_sample_size),
        };

        let exclusions = ctx.deps.platforms.exclusions(&ctx.platform);
        let result = reconcile::run_stage(
            std::path::Path::new(&path),
            &exclusions,
            ctx.deps.catalog.as_ref(),
            &opts,
        )
        .await?;

        Ok(TypedOutcome::new(ReconcileOutput {
            planned_updates: result.planned,
            updates_applied: result.outcome.applied as u64,
            update_errors: result.outcome.errors,
            verification_passed: result.outcome.verification_passed,
        }))
    }
}

// ---------------------------------------------------------------------------
// send_report
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReportInput {}

#[derive(Debug, Serialize)]
pub struct ReportOutput {
    pub notified: bool,
}

/// Emits the human-readable run summary through the notifier contract.
pub struct ReportNode;

#[async_trait]
impl TypedNode for ReportNode {
    type Input = ReportInput;
    type Output = ReportOutput;

    async fn execute(
        &self,
        _input: Self::Input,
        ctx: &NodeContext,
    ) -> Result<TypedOutcome<Self::Output>> {
        let summary: Option<AuditSummary> = ctx
            .state_value("summary")
            .and_then(|value| serde_json::from_value(value.clone()).ok());
        let updates_applied = ctx
            .state_value("updates_applied")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let update_errors: Vec<String> = ctx
            .state_value("update_errors")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        let verification_passed = ctx
            .state_value("verification_passed")
            .and_then(Value::as_bool);

        let report = RunReport {
            job_id: ctx.job_id,
            workflow_id: ctx.workflow_id.clone(),
            platform: ctx.platform.clone(),
            summary,
            updates_applied,
            update_errors,
            verification_passed,
        };
        ctx.deps.notifier.notify(&report).await?;
        Ok(TypedOutcome::new(ReportOutput { notified: true }))
    }
}

// ---------------------------------------------------------------------------
// watcher checks
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BannerCheckInput {
    pub url: String,
    #[serde(default)]
    pub selector: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BannerCheckOutput {
    pub banner_ok: bool,
    pub status_code: u16,
}

/// Confirms a page answers and (optionally) still renders its banner.
pub struct BannerCheckNode;

#[async_trait]
impl TypedNode for BannerCheckNode {
    type Input = BannerCheckInput;
    type Output = BannerCheckOutput;

    fn validate(&self, input: &Self::Input) -> ValidationResult {
        if input.url.is_empty() {
            ValidationResult::fail("url is required")
        } else {
            ValidationResult::ok()
        }
    }

    async fn execute(
        &self,
        input: Self::Input,
        ctx: &NodeContext,
    ) -> Result<TypedOutcome<Self::Output>> {
        let response = ctx
            .deps
            .http
            .get(&input.url)
            .send()
            .await
            .with_context(|| format!("banner check request to {} failed", input.url))?;
        let status_code = response.status().as_u16();
        let healthy_status = response.status().is_success();

        let banner_ok = match &input.selector {
            Some(selector) => {
                let body = response
                    .text()
                    .await
                    .context("banner check body unreadable")?;
                healthy_status && html_has_selector(&body, selector)
            }
            None => healthy_status,
        };

        if !banner_ok {
            warn!(url = %input.url, status_code, "banner check degraded");
        }
        Ok(TypedOutcome::new(BannerCheckOutput {
            banner_ok,
            status_code,
        }))
    }
}

#[derive(Debug, Deserialize)]
pub struct VoteCheckInput {
    pub endpoint: String,
    pub count_pointer: String,
    #[serde(default)]
    pub minimum: i64,
}

#[derive(Debug, Serialize)]
pub struct VoteCheckOutput {
    pub vote_ok: bool,
    pub count: i64,
}

/// Sanity-checks a vote count endpoint against a floor value.
pub struct VoteCheckNode;

#[async_trait]
impl TypedNode for VoteCheckNode {
    type Input = VoteCheckInput;
    type Output = VoteCheckOutput;

    fn validate(&self, input: &Self::Input) -> ValidationResult {
        if input.endpoint.is_empty() {
            ValidationResult::fail("endpoint is required")
        } else {
            ValidationResult::ok()
        }
    }

    async fn execute(
        &self,
        input: Self::Input,
        ctx: &NodeContext,
    ) -> Result<TypedOutcome<Self::Output>> {
        let body: Value = ctx
            .deps
            .http
            .get(&input.endpoint)
            .send()
            .await
            .with_context(|| format!("vote check request to {} failed", input.endpoint))?
            .error_for_status()
            .context("vote check endpoint returned an error status")?
            .json()
            .await
            .context("vote check response is not JSON")?;

        let count = body
            .pointer(&input.count_pointer)
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("no count at {}", input.count_pointer))?;
        let vote_ok = count >= input.minimum;
        if !vote_ok {
            warn!(endpoint = %input.endpoint, count, minimum = input.minimum, "vote check degraded");
        }
        Ok(TypedOutcome::new(VoteCheckOutput { vote_ok, count }))
    }
}

fn html_has_selector(html: &str, selector: &str) -> bool {
    let document = scraper::Html::parse_document(html);
    let Ok(selector) = scraper::Selector::parse(selector) else {
        return false;
    };
    document.select(&selector).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_every_pipeline_node() {
        let registry = build_node_registry();
        for node_type in [
            "collect_products",
            "verify_products",
            "reconcile_updates",
            "send_report",
            "banner_check",
            "vote_check",
        ] {
            assert!(registry.is_registered(node_type), "{node_type} missing");
        }
    }

    #[test]
    fn html_selector_presence() {
        let html = r#"<div class="main-banner">event</div>"#;
        assert!(html_has_selector(html, ".main-banner"));
        assert!(!html_has_selector(html, ".missing"));
        assert!(!html_has_selector(html, "!!!"));
    }

    #[test]
    fn collect_input_rejects_non_positive_limits() {
        let node = CollectProductsNode;
        let input = CollectInput {
            sale_state: SaleState::OnSale,
            limit: Some(0),
            link_url_pattern: None,
        };
        assert!(!node.validate(&input).is_valid());
    }
}
