//! Per-run context handed to every component.

use crate::error::{SyncError, SyncResult};
use crate::registry::RepositoryRegistry;
use alyx_catalog::CatalogStore;
use alyx_core::config::AppConfig;
use alyx_storage::{BulkTransfer, transfer_from_config};
use std::sync::Arc;

/// Catalog handle, repositories, transfer tool and settings for one run.
///
/// Built once per invocation and dropped at the end.
#[derive(Clone)]
pub struct SyncContext {
    pub catalog: Arc<dyn CatalogStore>,
    pub registry: Arc<RepositoryRegistry>,
    pub transfer: Arc<dyn BulkTransfer>,
    pub config: AppConfig,
}

impl SyncContext {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        registry: Arc<RepositoryRegistry>,
        transfer: Arc<dyn BulkTransfer>,
        config: AppConfig,
    ) -> Self {
        Self {
            catalog,
            registry,
            transfer,
            config,
        }
    }

    /// Open the catalog, build every repository store and publish the
    /// repositories to the catalog.
    pub async fn from_config(config: AppConfig, hostname: Option<&str>) -> SyncResult<Self> {
        let registry = RepositoryRegistry::from_config(&config, hostname).await?;
        if registry.is_empty() {
            return Err(SyncError::Config("no repositories configured".to_string()));
        }

        let catalog = alyx_catalog::from_config(&config.catalog).await?;
        registry.publish(catalog.as_ref()).await?;

        let transfer = transfer_from_config(&config.transfer, registry.stores());
        Ok(Self::new(catalog, Arc::new(registry), transfer, config))
    }
}
