//! Catalog test utilities.

use alyx_catalog::{CatalogResult, CatalogStore, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;

/// A temporary catalog that is removed on drop.
pub struct TestCatalog {
    pub store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

impl TestCatalog {
    pub async fn new() -> CatalogResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteStore::new(temp_dir.path().join("catalog.db"), 5).await?;
        Ok(Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }
}
