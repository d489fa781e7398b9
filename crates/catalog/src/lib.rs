//! Dataset catalog for Alyx synchronization.
//!
//! This crate is the single source of truth for bookkeeping:
//! - Repositories known to the catalog
//! - Sessions and the datasets they own
//! - File records pairing datasets with repositories
//! - The append-only sync watermark log

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{CatalogError, CatalogResult};
pub use repos::{DatasetFilter, FileRecordFilter};
pub use store::{CatalogStore, SqliteStore};

use alyx_core::config::CatalogConfig;
use std::sync::Arc;

/// Open the catalog described by the configuration and apply the schema.
pub async fn from_config(config: &CatalogConfig) -> CatalogResult<Arc<dyn CatalogStore>> {
    match config {
        CatalogConfig::Sqlite {
            path,
            busy_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *busy_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn CatalogStore>)
        }
    }
}
