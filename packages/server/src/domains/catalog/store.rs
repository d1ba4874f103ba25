//! Catalog store: reads and field-masked writes against the source of
//! record, behind a trait so stages can run against an in-memory double.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder};
use tokio::sync::Mutex;

use super::models::{PriceHistoryEntry, ProductRecord, ProductUpdate, ReviewHistoryEntry};
use crate::common::SaleState;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Products eligible for a validation run, oldest-verified first.
    async fn products_for_validation(
        &self,
        platform: &str,
        sale_status: SaleState,
        link_url_pattern: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ProductRecord>>;

    async fn find_product(
        &self,
        product_set_id: i64,
        product_id: i64,
    ) -> Result<Option<ProductRecord>>;

    /// Apply a sparse update; only whitelisted columns are writable.
    async fn apply_update(&self, update: &ProductUpdate) -> Result<()>;

    async fn record_review_history(&self, entry: &ReviewHistoryEntry) -> Result<()>;

    async fn record_price_history(&self, entry: &PriceHistoryEntry) -> Result<()>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const PRODUCT_COLUMNS: &str = "product_set_id, product_id, platform, link_url, product_name, \
                               thumbnail, original_price, discounted_price, sale_status, updated_at";

#[async_trait]
impl CatalogStore for PostgresCatalog {
    async fn products_for_validation(
        &self,
        platform: &str,
        sale_status: SaleState,
        link_url_pattern: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ProductRecord>> {
        let pattern = link_url_pattern.map(|p| p.replace('*', "%"));
        let products = sqlx::query_as::<_, ProductRecord>(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS}
            FROM products
            WHERE platform = $1
              AND sale_status = $2
              AND ($3::TEXT IS NULL OR link_url LIKE $3)
            ORDER BY updated_at ASC
            LIMIT $4
            "#
        ))
        .bind(platform)
        .bind(sale_status)
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to load products for validation")?;

        Ok(products)
    }

    async fn find_product(
        &self,
        product_set_id: i64,
        product_id: i64,
    ) -> Result<Option<ProductRecord>> {
        let product = sqlx::query_as::<_, ProductRecord>(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS}
            FROM products
            WHERE product_set_id = $1 AND product_id = $2
            "#
        ))
        .bind(product_set_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    async fn apply_update(&self, update: &ProductUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("UPDATE products SET updated_at = NOW()");
        for (field, value) in &update.fields {
            match field.as_str() {
                "product_name" => {
                    builder.push(", product_name = ");
                    builder.push_bind(value.as_str().unwrap_or_default().to_string());
                }
                "thumbnail" => {
                    builder.push(", thumbnail = ");
                    builder.push_bind(value.as_str().unwrap_or_default().to_string());
                }
                "original_price" => {
                    builder.push(", original_price = ");
                    builder.push_bind(value.as_i64().unwrap_or_default());
                }
                "discounted_price" => {
                    builder.push(", discounted_price = ");
                    builder.push_bind(value.as_i64().unwrap_or_default());
                }
                "sale_status" => {
                    builder.push(", sale_status = ");
                    builder.push_bind(SaleState::normalize(value.as_str().unwrap_or_default()));
                }
                other => bail!("refusing to update unknown field: {other}"),
            }
        }
        builder.push(" WHERE product_set_id = ");
        builder.push_bind(update.product_set_id);
        builder.push(" AND product_id = ");
        builder.push_bind(update.product_id);

        builder
            .build()
            .execute(&self.pool)
            .await
            .with_context(|| {
                format!(
                    "failed to update product {}:{}",
                    update.product_set_id, update.product_id
                )
            })?;
        Ok(())
    }

    async fn record_review_history(&self, entry: &ReviewHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO product_review_history (
                id, product_set_id, product_id, platform, before_state, after_state,
                comment, classification, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(entry.product_set_id)
        .bind(entry.product_id)
        .bind(&entry.platform)
        .bind(&entry.before)
        .bind(&entry.after)
        .bind(&entry.comment)
        .bind(entry.classification.as_str())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_price_history(&self, entry: &PriceHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO product_price_history (
                id, product_set_id, product_id, platform, price_field,
                old_price, new_price, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.product_set_id)
        .bind(entry.product_id)
        .bind(&entry.platform)
        .bind(&entry.price_field)
        .bind(entry.old_price)
        .bind(entry.new_price)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory double for tests and local development
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    products: Vec<ProductRecord>,
    updates: Vec<ProductUpdate>,
    reviews: Vec<ReviewHistoryEntry>,
    prices: Vec<PriceHistoryEntry>,
    failing: HashSet<(i64, i64)>,
}

#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<MemoryState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, product: ProductRecord) {
        self.state.lock().await.products.push(product);
    }

    /// Make `apply_update` fail for one product, for error-path tests.
    pub async fn fail_updates_for(&self, product_set_id: i64, product_id: i64) {
        self.state
            .lock()
            .await
            .failing
            .insert((product_set_id, product_id));
    }

    pub async fn applied_updates(&self) -> Vec<ProductUpdate> {
        self.state.lock().await.updates.clone()
    }

    pub async fn review_entries(&self) -> Vec<ReviewHistoryEntry> {
        self.state.lock().await.reviews.clone()
    }

    pub async fn price_entries(&self) -> Vec<PriceHistoryEntry> {
        self.state.lock().await.prices.clone()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn products_for_validation(
        &self,
        platform: &str,
        sale_status: SaleState,
        link_url_pattern: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ProductRecord>> {
        let state = self.state.lock().await;
        let prefix = link_url_pattern.map(|p| p.trim_end_matches('*').to_string());
        Ok(state
            .products
            .iter()
            .filter(|p| p.platform == platform && p.sale_status == sale_status)
            .filter(|p| {
                prefix
                    .as_deref()
                    .map_or(true, |prefix| p.link_url.starts_with(prefix))
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn find_product(
        &self,
        product_set_id: i64,
        product_id: i64,
    ) -> Result<Option<ProductRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .products
            .iter()
            .find(|p| p.product_set_id == product_set_id && p.product_id == product_id)
            .cloned())
    }

    async fn apply_update(&self, update: &ProductUpdate) -> Result<()> {
        let mut state = self.state.lock().await;
        if state
            .failing
            .contains(&(update.product_set_id, update.product_id))
        {
            bail!(
                "injected failure for {}:{}",
                update.product_set_id,
                update.product_id
            );
        }

        if let Some(product) = state
            .products
            .iter_mut()
            .find(|p| p.product_set_id == update.product_set_id && p.product_id == update.product_id)
        {
            for (field, value) in &update.fields {
                match field.as_str() {
                    "product_name" => {
                        product.product_name = value.as_str().unwrap_or_default().to_string()
                    }
                    "thumbnail" => {
                        product.thumbnail = value.as_str().unwrap_or_default().to_string()
                    }
                    "original_price" => product.original_price = value.as_i64().unwrap_or_default(),
                    "discounted_price" => {
                        product.discounted_price = value.as_i64().unwrap_or_default()
                    }
                    "sale_status" => {
                        product.sale_status =
                            SaleState::normalize(value.as_str().unwrap_or_default())
                    }
                    other => bail!("refusing to update unknown field: {other}"),
                }
            }
        }
        state.updates.push(update.clone());
        Ok(())
    }

    async fn record_review_history(&self, entry: &ReviewHistoryEntry) -> Result<()> {
        self.state.lock().await.reviews.push(entry.clone());
        Ok(())
    }

    async fn record_price_history(&self, entry: &PriceHistoryEntry) -> Result<()> {
        self.state.lock().await.prices.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(set: i64, id: i64, state: SaleState) -> ProductRecord {
        ProductRecord {
            product_set_id: set,
            product_id: id,
            platform: "hwahae".into(),
            link_url: format!("https://www.hwahae.co.kr/goods/{id}"),
            product_name: "A".into(),
            thumbnail: "T".into(),
            original_price: 20000,
            discounted_price: 16000,
            sale_status: state,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn filters_by_platform_state_and_pattern() {
        let catalog = MemoryCatalog::new();
        catalog.insert(product(1, 1, SaleState::OnSale)).await;
        catalog.insert(product(1, 2, SaleState::OffSale)).await;

        let on_sale = catalog
            .products_for_validation(
                "hwahae",
                SaleState::OnSale,
                Some("https://www.hwahae.co.kr/goods/*"),
                10,
            )
            .await
            .unwrap();
        assert_eq!(on_sale.len(), 1);
        assert_eq!(on_sale[0].product_id, 1);

        let elsewhere = catalog
            .products_for_validation("hwahae", SaleState::OnSale, Some("https://other/*"), 10)
            .await
            .unwrap();
        assert!(elsewhere.is_empty());
    }

    #[tokio::test]
    async fn apply_update_mutates_only_named_fields() {
        let catalog = MemoryCatalog::new();
        catalog.insert(product(1, 1, SaleState::OnSale)).await;

        let mut update = ProductUpdate::new(1, 1);
        update.set("discounted_price", serde_json::json!(14000));
        catalog.apply_update(&update).await.unwrap();

        let stored = catalog.find_product(1, 1).await.unwrap().unwrap();
        assert_eq!(stored.discounted_price, 14000);
        assert_eq!(stored.original_price, 20000);
        assert_eq!(stored.product_name, "A");
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let catalog = MemoryCatalog::new();
        catalog.insert(product(1, 1, SaleState::OnSale)).await;
        catalog.fail_updates_for(1, 1).await;

        let mut update = ProductUpdate::new(1, 1);
        update.set("discounted_price", serde_json::json!(14000));
        assert!(catalog.apply_update(&update).await.is_err());
    }
}
