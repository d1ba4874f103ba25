//! Five-field comparison between the stored record and a live snapshot.

use chrono::Utc;

use crate::common::{AuditRecord, AuditStatus, FieldComparison};
use crate::domains::catalog::ProductRecord;
use crate::domains::platforms::fetch::FetchOutcome;

/// Build the audit row for one verified product.
pub fn compare_product(record: &ProductRecord, outcome: &FetchOutcome) -> AuditRecord {
    match outcome {
        FetchOutcome::Snapshot(fetched) => {
            let db = record.snapshot();
            let comparison = FieldComparison {
                product_name: db.name == fetched.name,
                thumbnail: db.thumbnail == fetched.thumbnail,
                original_price: db.original_price == fetched.original_price,
                discounted_price: db.discounted_price == fetched.discounted_price,
                sale_status: db.sale_status == fetched.sale_status,
            };
            AuditRecord {
                product_set_id: record.product_set_id,
                product_id: record.product_id,
                platform: record.platform.clone(),
                url: record.link_url.clone(),
                db,
                fetch: Some(fetched.clone()),
                is_match: comparison.all_match(),
                comparison: Some(comparison),
                status: AuditStatus::Success,
                validated_at: Utc::now(),
            }
        }
        FetchOutcome::NotFound => AuditRecord {
            product_set_id: record.product_set_id,
            product_id: record.product_id,
            platform: record.platform.clone(),
            url: record.link_url.clone(),
            db: record.snapshot(),
            fetch: None,
            comparison: None,
            is_match: false,
            status: AuditStatus::NotFound,
            validated_at: Utc::now(),
        },
    }
}

/// Audit row for an item whose fetch errored out entirely.
pub fn audit_fetch_failure(record: &ProductRecord) -> AuditRecord {
    AuditRecord {
        product_set_id: record.product_set_id,
        product_id: record.product_id,
        platform: record.platform.clone(),
        url: record.link_url.clone(),
        db: record.snapshot(),
        fetch: None,
        comparison: None,
        is_match: false,
        status: AuditStatus::Failed,
        validated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ProductSnapshot, SaleState};

    fn record() -> ProductRecord {
        ProductRecord {
            product_set_id: 1,
            product_id: 21320,
            platform: "hwahae".into(),
            link_url: "https://www.hwahae.co.kr/goods/21320".into(),
            product_name: "A".into(),
            thumbnail: "T".into(),
            original_price: 20000,
            discounted_price: 16000,
            sale_status: SaleState::OnSale,
            updated_at: Utc::now(),
        }
    }

    fn identical_snapshot() -> ProductSnapshot {
        ProductSnapshot {
            name: "A".into(),
            thumbnail: "T".into(),
            original_price: 20000,
            discounted_price: 16000,
            sale_status: SaleState::OnSale,
        }
    }

    #[test]
    fn identical_fields_produce_a_match() {
        let audit = compare_product(&record(), &FetchOutcome::Snapshot(identical_snapshot()));
        assert!(audit.is_match);
        assert_eq!(audit.status, AuditStatus::Success);
        assert!(audit.comparison.unwrap().all_match());
    }

    #[test]
    fn price_drift_flags_only_the_drifted_field() {
        let mut fetched = identical_snapshot();
        fetched.discounted_price = 14000;
        let audit = compare_product(&record(), &FetchOutcome::Snapshot(fetched));

        assert!(!audit.is_match);
        let comparison = audit.comparison.unwrap();
        assert!(!comparison.discounted_price);
        assert!(comparison.product_name);
        assert!(comparison.original_price);
        assert!(comparison.sale_status);
    }

    #[test]
    fn not_found_produces_null_fetch_and_no_comparison() {
        let audit = compare_product(&record(), &FetchOutcome::NotFound);
        assert_eq!(audit.status, AuditStatus::NotFound);
        assert!(audit.fetch.is_none());
        assert!(audit.comparison.is_none());
        assert!(!audit.is_match);
    }

    #[test]
    fn fetch_failure_is_recorded_as_failed() {
        let audit = audit_fetch_failure(&record());
        assert_eq!(audit.status, AuditStatus::Failed);
        assert!(audit.fetch.is_none());
    }
}
