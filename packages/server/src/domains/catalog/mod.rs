//! Source-of-record access: product rows, sparse updates, and history.

mod models;
mod store;

pub use models::{
    ChangeClassification, PriceHistoryEntry, ProductRecord, ProductUpdate, ReviewHistoryEntry,
};
pub use store::{CatalogStore, MemoryCatalog, PostgresCatalog};
