//! Reconciliation of confirmed drift back into the source of record.
//!
//! Planning is pure: audit records plus the platform's exclusion policy
//! produce sparse field-masked updates. Application batches those updates
//! into the database with an inter-batch delay, records review and price
//! history, and verifies a sampled subset by re-reading it.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::common::{AuditRecord, AuditStatus, SaleState};
use crate::domains::catalog::{
    CatalogStore, ChangeClassification, PriceHistoryEntry, ProductRecord, ProductUpdate,
    ReviewHistoryEntry,
};
use crate::domains::platforms::ExclusionPolicy;
use crate::kernel::audit::read_audit_log;

pub const FETCH_FAILED_MARKER: &str = "fetch 가 실패했습니다";

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub verify_sample_size: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            batch_size: 20,
            batch_delay: Duration::from_millis(500),
            verify_sample_size: 5,
        }
    }
}

/// One field drifting from the stored value.
#[derive(Debug, Clone, PartialEq)]
struct FieldChange {
    field: &'static str,
    before: Value,
    after: Value,
}

impl FieldChange {
    fn is_price(&self) -> bool {
        matches!(self.field, "original_price" | "discounted_price")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceChange {
    pub field: String,
    pub old_price: i64,
    pub new_price: i64,
}

/// A fully-resolved update ready to apply, with its review metadata.
#[derive(Debug, Clone)]
pub struct PlannedUpdate {
    pub update: ProductUpdate,
    pub platform: String,
    pub before: Value,
    pub after: Value,
    pub comment: String,
    pub classification: ChangeClassification,
    pub price_changes: Vec<PriceChange>,
}

#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub updates: Vec<PlannedUpdate>,
}

/// Build sparse updates from parsed audit records.
///
/// Eligible records are successful mismatches; a not-found record whose
/// stored state still says `on_sale` materializes a synthetic off-sale
/// update. Excluded fields are dropped before anything else sees them,
/// zero prices are treated as suspicious and never written, and every
/// sale-state value is normalized into the closed set.
pub fn plan_updates(records: &[AuditRecord], exclusions: &ExclusionPolicy) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    for record in records {
        let planned = match record.status {
            AuditStatus::Success if !record.is_match => plan_drift(record, exclusions),
            AuditStatus::NotFound if record.db.sale_status == SaleState::OnSale => {
                plan_vanished(record, exclusions)
            }
            _ => None,
        };
        if let Some(planned) = planned {
            plan.updates.push(planned);
        }
    }

    plan
}

fn plan_drift(record: &AuditRecord, exclusions: &ExclusionPolicy) -> Option<PlannedUpdate> {
    let fetched = record.fetch.as_ref()?;
    let comparison = record.comparison.as_ref()?;
    let db = &record.db;

    let mut changes: Vec<FieldChange> = Vec::new();
    if !comparison.product_name {
        changes.push(FieldChange {
            field: "product_name",
            before: json!(db.name),
            after: json!(fetched.name),
        });
    }
    if !comparison.thumbnail {
        changes.push(FieldChange {
            field: "thumbnail",
            before: json!(db.thumbnail),
            after: json!(fetched.thumbnail),
        });
    }
    if !comparison.original_price && fetched.original_price != 0 {
        changes.push(FieldChange {
            field: "original_price",
            before: json!(db.original_price),
            after: json!(fetched.original_price),
        });
    }
    if !comparison.discounted_price && fetched.discounted_price != 0 {
        changes.push(FieldChange {
            field: "discounted_price",
            before: json!(db.discounted_price),
            after: json!(fetched.discounted_price),
        });
    }
    if !comparison.sale_status {
        changes.push(FieldChange {
            field: "sale_status",
            before: json!(db.sale_status.as_str()),
            after: json!(fetched.sale_status.as_str()),
        });
    }

    changes.retain(|change| !exclusions.is_excluded(change.field));
    if changes.is_empty() {
        return None;
    }

    let classification = if changes.iter().all(FieldChange::is_price) {
        ChangeClassification::OnlyPrice
    } else {
        ChangeClassification::All
    };

    Some(build_planned(record, changes, classification, false))
}

fn plan_vanished(record: &AuditRecord, exclusions: &ExclusionPolicy) -> Option<PlannedUpdate> {
    if exclusions.is_excluded("sale_status") {
        return None;
    }
    let changes = vec![FieldChange {
        field: "sale_status",
        before: json!(record.db.sale_status.as_str()),
        after: json!(SaleState::OffSale.as_str()),
    }];
    Some(build_planned(
        record,
        changes,
        ChangeClassification::Confused,
        true,
    ))
}

fn build_planned(
    record: &AuditRecord,
    changes: Vec<FieldChange>,
    classification: ChangeClassification,
    fetch_failed: bool,
) -> PlannedUpdate {
    let mut update = ProductUpdate::new(record.product_set_id, record.product_id);
    let mut after = Map::new();
    let mut price_changes = Vec::new();

    for change in &changes {
        update.set(change.field, change.after.clone());
        after.insert(change.field.to_string(), change.after.clone());
        if change.is_price() {
            price_changes.push(PriceChange {
                field: change.field.to_string(),
                old_price: change.before.as_i64().unwrap_or_default(),
                new_price: change.after.as_i64().unwrap_or_default(),
            });
        }
    }

    PlannedUpdate {
        update,
        platform: record.platform.clone(),
        before: serde_json::to_value(&record.db).unwrap_or(Value::Null),
        after: Value::Object(after),
        comment: render_comment(&changes, fetch_failed),
        classification,
        price_changes,
    }
}

/// `field: before -> after` per changed field, newline-joined; a failed
/// fetch leads with its marker line.
fn render_comment(changes: &[FieldChange], fetch_failed: bool) -> String {
    let mut lines = Vec::with_capacity(changes.len() + 1);
    if fetch_failed {
        lines.push(FETCH_FAILED_MARKER.to_string());
    }
    for change in changes {
        lines.push(format!(
            "{}: {} -> {}",
            change.field,
            comment_value(&change.before),
            comment_value(&change.after)
        ));
    }
    lines.join("\n")
}

fn comment_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub applied: usize,
    pub errors: Vec<String>,
    pub verification_passed: Option<bool>,
}

/// Apply a plan in batches. Per-record failures are collected, never
/// abort the batch; verification failure is surfaced, never fatal.
pub async fn apply_plan(
    plan: &ReconcilePlan,
    catalog: &dyn CatalogStore,
    opts: &ReconcileOptions,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    let mut applied_items: Vec<&PlannedUpdate> = Vec::new();

    let batches: Vec<&[PlannedUpdate]> = plan.updates.chunks(opts.batch_size.max(1)).collect();
    let batch_count = batches.len();
    for (index, batch) in batches.into_iter().enumerate() {
        for planned in batch {
            match catalog.apply_update(&planned.update).await {
                Ok(()) => {
                    outcome.applied += 1;
                    applied_items.push(planned);
                    record_history(catalog, planned).await;
                }
                Err(e) => {
                    outcome.errors.push(format!(
                        "{}:{}: {e:#}",
                        planned.update.product_set_id, planned.update.product_id
                    ));
                }
            }
        }
        if index + 1 < batch_count {
            tokio::time::sleep(opts.batch_delay).await;
        }
    }

    outcome.verification_passed =
        verify_sample(catalog, &applied_items, opts.verify_sample_size).await;

    info!(
        applied = outcome.applied,
        errors = outcome.errors.len(),
        verification = ?outcome.verification_passed,
        "reconciliation applied"
    );
    outcome
}

async fn record_history(catalog: &dyn CatalogStore, planned: &PlannedUpdate) {
    let review = ReviewHistoryEntry {
        id: Uuid::now_v7(),
        product_set_id: planned.update.product_set_id,
        product_id: planned.update.product_id,
        platform: planned.platform.clone(),
        before: planned.before.clone(),
        after: planned.after.clone(),
        comment: planned.comment.clone(),
        classification: planned.classification,
        created_at: Utc::now(),
    };
    if let Err(e) = catalog.record_review_history(&review).await {
        warn!(
            product_set_id = planned.update.product_set_id,
            product_id = planned.update.product_id,
            error = %e,
            "review history write failed"
        );
    }

    for price in &planned.price_changes {
        let entry = PriceHistoryEntry {
            id: Uuid::now_v7(),
            product_set_id: planned.update.product_set_id,
            product_id: planned.update.product_id,
            platform: planned.platform.clone(),
            price_field: price.field.clone(),
            old_price: price.old_price,
            new_price: price.new_price,
            created_at: Utc::now(),
        };
        if let Err(e) = catalog.record_price_history(&entry).await {
            warn!(
                product_set_id = planned.update.product_set_id,
                product_id = planned.update.product_id,
                error = %e,
                "price history write failed"
            );
        }
    }
}

/// Re-read a uniformly sampled subset of applied updates and check field
/// equality. `None` when nothing was applied or sampling is disabled.
async fn verify_sample(
    catalog: &dyn CatalogStore,
    applied: &[&PlannedUpdate],
    sample_size: usize,
) -> Option<bool> {
    if applied.is_empty() || sample_size == 0 {
        return None;
    }

    let mut indices: Vec<usize> = (0..applied.len()).collect();
    fastrand::shuffle(&mut indices);
    indices.truncate(sample_size);

    let mut passed = true;
    for index in indices {
        let planned = applied[index];
        let stored = match catalog
            .find_product(planned.update.product_set_id, planned.update.product_id)
            .await
        {
            Ok(Some(product)) => product,
            Ok(None) => {
                warn!(
                    product_set_id = planned.update.product_set_id,
                    product_id = planned.update.product_id,
                    "verification read found no row"
                );
                passed = false;
                continue;
            }
            Err(e) => {
                warn!(error = %e, "verification read failed");
                passed = false;
                continue;
            }
        };

        for (field, value) in &planned.update.fields {
            if !field_matches(&stored, field, value) {
                warn!(
                    product_set_id = planned.update.product_set_id,
                    product_id = planned.update.product_id,
                    field = %field,
                    "verification mismatch"
                );
                passed = false;
            }
        }
    }
    Some(passed)
}

fn field_matches(product: &ProductRecord, field: &str, value: &Value) -> bool {
    match field {
        "product_name" => product.product_name == value.as_str().unwrap_or_default(),
        "thumbnail" => product.thumbnail == value.as_str().unwrap_or_default(),
        "original_price" => product.original_price == value.as_i64().unwrap_or_default(),
        "discounted_price" => product.discounted_price == value.as_i64().unwrap_or_default(),
        "sale_status" => product.sale_status.as_str() == value.as_str().unwrap_or_default(),
        _ => false,
    }
}

#[derive(Debug)]
pub struct StageResult {
    pub planned: usize,
    pub outcome: ReconcileOutcome,
}

/// Parse an audit log and drive the full stage against the catalog.
pub async fn run_stage(
    audit_log_path: &Path,
    exclusions: &ExclusionPolicy,
    catalog: &dyn CatalogStore,
    opts: &ReconcileOptions,
) -> Result<StageResult> {
    let log = read_audit_log(audit_log_path).await?;
    if !log.is_complete() {
        warn!(
            path = %audit_log_path.display(),
            "reconciling an incomplete audit log"
        );
    }
    let plan = plan_updates(&log.records, exclusions);
    let planned = plan.updates.len();
    let outcome = apply_plan(&plan, catalog, opts).await;
    Ok(StageResult { planned, outcome })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{FieldComparison, ProductSnapshot};

    fn db_snapshot() -> ProductSnapshot {
        ProductSnapshot {
            name: "A".into(),
            thumbnail: "T".into(),
            original_price: 20000,
            discounted_price: 16000,
            sale_status: SaleState::OnSale,
        }
    }

    fn drift_record(fetched: ProductSnapshot) -> AuditRecord {
        let db = db_snapshot();
        let comparison = FieldComparison {
            product_name: db.name == fetched.name,
            thumbnail: db.thumbnail == fetched.thumbnail,
            original_price: db.original_price == fetched.original_price,
            discounted_price: db.discounted_price == fetched.discounted_price,
            sale_status: db.sale_status == fetched.sale_status,
        };
        AuditRecord {
            product_set_id: 1,
            product_id: 21320,
            platform: "hwahae".into(),
            url: "https://www.hwahae.co.kr/goods/21320".into(),
            db,
            fetch: Some(fetched),
            is_match: comparison.all_match(),
            comparison: Some(comparison),
            status: AuditStatus::Success,
            validated_at: Utc::now(),
        }
    }

    #[test]
    fn matching_records_plan_nothing() {
        let record = drift_record(db_snapshot());
        let plan = plan_updates(&[record], &ExclusionPolicy::default());
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn price_drift_touches_only_the_drifted_field() {
        let mut fetched = db_snapshot();
        fetched.discounted_price = 14000;
        let plan = plan_updates(&[drift_record(fetched)], &ExclusionPolicy::default());

        assert_eq!(plan.updates.len(), 1);
        let planned = &plan.updates[0];
        assert_eq!(planned.update.fields.len(), 1);
        assert_eq!(planned.update.fields["discounted_price"], json!(14000));
        assert_eq!(planned.classification, ChangeClassification::OnlyPrice);
        assert_eq!(planned.comment, "discounted_price: 16000 -> 14000");
        assert_eq!(
            planned.price_changes,
            vec![PriceChange {
                field: "discounted_price".into(),
                old_price: 16000,
                new_price: 14000,
            }]
        );
    }

    #[test]
    fn zero_prices_are_suspicious_and_never_written() {
        let mut fetched = db_snapshot();
        fetched.discounted_price = 0;
        let plan = plan_updates(&[drift_record(fetched)], &ExclusionPolicy::default());
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn excluded_fields_are_removed_from_the_payload() {
        let mut fetched = db_snapshot();
        fetched.name = "B".into();
        fetched.discounted_price = 14000;
        let exclusions = ExclusionPolicy {
            skip_fields: vec!["product_name".into()],
            reason: "names are curated by hand".into(),
        };
        let plan = plan_updates(&[drift_record(fetched)], &exclusions);

        assert_eq!(plan.updates.len(), 1);
        let fields: Vec<&String> = plan.updates[0].update.fields.keys().collect();
        assert_eq!(fields, vec!["discounted_price"]);
    }

    #[test]
    fn fully_excluded_updates_are_dropped() {
        let mut fetched = db_snapshot();
        fetched.name = "B".into();
        let exclusions = ExclusionPolicy {
            skip_fields: vec!["product_name".into()],
            reason: String::new(),
        };
        let plan = plan_updates(&[drift_record(fetched)], &exclusions);
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn name_and_price_drift_classifies_as_all() {
        let mut fetched = db_snapshot();
        fetched.name = "B".into();
        fetched.discounted_price = 14000;
        let plan = plan_updates(&[drift_record(fetched)], &ExclusionPolicy::default());
        assert_eq!(plan.updates[0].classification, ChangeClassification::All);
        assert_eq!(
            plan.updates[0].comment,
            "product_name: A -> B\ndiscounted_price: 16000 -> 14000"
        );
    }

    #[test]
    fn vanished_on_sale_products_get_a_synthetic_off_sale_update() {
        let record = AuditRecord {
            product_set_id: 1,
            product_id: 21320,
            platform: "hwahae".into(),
            url: "https://www.hwahae.co.kr/goods/21320".into(),
            db: db_snapshot(),
            fetch: None,
            comparison: None,
            is_match: false,
            status: AuditStatus::NotFound,
            validated_at: Utc::now(),
        };
        let plan = plan_updates(&[record], &ExclusionPolicy::default());

        assert_eq!(plan.updates.len(), 1);
        let planned = &plan.updates[0];
        assert_eq!(planned.update.fields.len(), 1);
        assert_eq!(planned.update.fields["sale_status"], json!("off_sale"));
        assert_eq!(planned.classification, ChangeClassification::Confused);
        assert_eq!(
            planned.comment,
            format!("{FETCH_FAILED_MARKER}\nsale_status: on_sale -> off_sale")
        );
    }

    #[test]
    fn vanished_off_sale_products_plan_nothing() {
        let mut db = db_snapshot();
        db.sale_status = SaleState::OffSale;
        let record = AuditRecord {
            product_set_id: 1,
            product_id: 21320,
            platform: "hwahae".into(),
            url: String::new(),
            db,
            fetch: None,
            comparison: None,
            is_match: false,
            status: AuditStatus::NotFound,
            validated_at: Utc::now(),
        };
        let plan = plan_updates(&[record], &ExclusionPolicy::default());
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn failed_fetches_plan_nothing() {
        let record = AuditRecord {
            product_set_id: 1,
            product_id: 21320,
            platform: "hwahae".into(),
            url: String::new(),
            db: db_snapshot(),
            fetch: None,
            comparison: None,
            is_match: false,
            status: AuditStatus::Failed,
            validated_at: Utc::now(),
        };
        let plan = plan_updates(&[record], &ExclusionPolicy::default());
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn every_planned_sale_state_is_in_the_closed_set() {
        let mut fetched = db_snapshot();
        fetched.sale_status = SaleState::OffSale;
        let plan = plan_updates(&[drift_record(fetched)], &ExclusionPolicy::default());
        for planned in &plan.updates {
            if let Some(value) = planned.update.fields.get("sale_status") {
                let value = value.as_str().unwrap();
                assert!(value == "on_sale" || value == "off_sale");
            }
        }
    }
}
