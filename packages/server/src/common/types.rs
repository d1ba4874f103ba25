//! Shared value types for the verification pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized two-valued sale label written to the source of record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, sqlx::Type, Hash,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "sale_state", rename_all = "snake_case")]
pub enum SaleState {
    OnSale,
    #[default]
    OffSale,
}

/// Upstream labels that count as "on sale". Anything else collapses to
/// `off_sale`.
const ON_SALE_SYNONYMS: &[&str] = &[
    "on_sale",
    "onsale",
    "on sale",
    "sale",
    "selling",
    "available",
    "in_stock",
    "true",
    "판매중",
    "판매 중",
];

impl SaleState {
    /// Collapse the open set of upstream strings into the closed set.
    pub fn normalize(raw: &str) -> SaleState {
        let lowered = raw.trim().to_lowercase();
        if ON_SALE_SYNONYMS.contains(&lowered.as_str()) {
            SaleState::OnSale
        } else {
            SaleState::OffSale
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SaleState::OnSale => "on_sale",
            SaleState::OffSale => "off_sale",
        }
    }
}

impl fmt::Display for SaleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five verified fields, as they exist in the database or as fetched
/// live from the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub name: String,
    pub thumbnail: String,
    pub original_price: i64,
    pub discounted_price: i64,
    pub sale_status: SaleState,
}

/// Per-field comparison outcome; `true` means the stored value matches the
/// fetched value. Field names track the `products` columns they guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldComparison {
    pub product_name: bool,
    pub thumbnail: bool,
    pub original_price: bool,
    pub discounted_price: bool,
    pub sale_status: bool,
}

impl FieldComparison {
    pub fn all_match(&self) -> bool {
        self.product_name
            && self.thumbnail
            && self.original_price
            && self.discounted_price
            && self.sale_status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failed,
    NotFound,
}

/// Canonical per-item row emitted by the compare stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub product_set_id: i64,
    pub product_id: i64,
    pub platform: String,
    pub url: String,
    pub db: ProductSnapshot,
    pub fetch: Option<ProductSnapshot>,
    pub comparison: Option<FieldComparison>,
    #[serde(rename = "match")]
    pub is_match: bool,
    pub status: AuditStatus,
    pub validated_at: DateTime<Utc>,
}
