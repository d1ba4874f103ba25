//! Source-of-record rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::common::{ProductSnapshot, SaleState};

/// One catalog entry, keyed by (product_set_id, product_id).
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ProductRecord {
    pub product_set_id: i64,
    pub product_id: i64,
    pub platform: String,
    pub link_url: String,
    pub product_name: String,
    pub thumbnail: String,
    pub original_price: i64,
    pub discounted_price: i64,
    pub sale_status: SaleState,
    pub updated_at: DateTime<Utc>,
}

impl ProductRecord {
    /// The five verified fields as currently stored.
    pub fn snapshot(&self) -> ProductSnapshot {
        ProductSnapshot {
            name: self.product_name.clone(),
            thumbnail: self.thumbnail.clone(),
            original_price: self.original_price,
            discounted_price: self.discounted_price,
            sale_status: self.sale_status,
        }
    }
}

/// Sparse field-masked update against one product row.
///
/// Built as an explicit field-name-keyed map; excluded keys are removed
/// before the update ever reaches the database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub product_set_id: i64,
    pub product_id: i64,
    pub fields: BTreeMap<String, Value>,
}

impl ProductUpdate {
    pub fn new(product_set_id: i64, product_id: i64) -> Self {
        Self {
            product_set_id,
            product_id,
            fields: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// How a reconciled change is classified for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeClassification {
    /// Only price fields moved.
    OnlyPrice,
    /// Non-price fields moved too.
    All,
    /// The fetch came back empty; the change is inferred.
    Confused,
}

impl ChangeClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeClassification::OnlyPrice => "only-price",
            ChangeClassification::All => "all",
            ChangeClassification::Confused => "confused",
        }
    }
}

/// Before/after review entry recorded per reconciled item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewHistoryEntry {
    pub id: Uuid,
    pub product_set_id: i64,
    pub product_id: i64,
    pub platform: String,
    pub before: Value,
    pub after: Value,
    pub comment: String,
    pub classification: ChangeClassification,
    pub created_at: DateTime<Utc>,
}

/// Price movement recorded when either price field changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub id: Uuid,
    pub product_set_id: i64,
    pub product_id: i64,
    pub platform: String,
    pub price_field: String,
    pub old_price: i64,
    pub new_price: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_mirrors_stored_fields() {
        let record = ProductRecord {
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
        };
        let snapshot = record.snapshot();
        assert_eq!(snapshot.name, "A");
        assert_eq!(snapshot.discounted_price, 16000);
        assert_eq!(snapshot.sale_status, SaleState::OnSale);
    }

    #[test]
    fn update_tracks_fields_sparsely() {
        let mut update = ProductUpdate::new(1, 2);
        assert!(update.is_empty());
        update.set("discounted_price", json!(14000));
        assert!(!update.is_empty());
        assert_eq!(update.fields.len(), 1);
    }

    #[test]
    fn classification_serializes_kebab_case() {
        let json = serde_json::to_string(&ChangeClassification::OnlyPrice).unwrap();
        assert_eq!(json, "\"only-price\"");
        assert_eq!(ChangeClassification::Confused.as_str(), "confused");
    }
}
