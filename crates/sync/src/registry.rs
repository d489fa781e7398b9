//! Repository registry: configured repositories paired with their stores.

use crate::error::{SyncError, SyncResult};
use alyx_catalog::CatalogStore;
use alyx_catalog::repos::RepositoryRepo;
use alyx_core::Repository;
use alyx_core::config::AppConfig;
use alyx_storage::{ObjectStore, TransferEndpoint};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One repository and the store used to probe it.
#[derive(Clone)]
pub struct RegisteredRepository {
    pub repository: Repository,
    pub store: Arc<dyn ObjectStore>,
}

impl RegisteredRepository {
    pub fn name(&self) -> &str {
        &self.repository.name
    }

    /// Transfer endpoint for a directory below this repository's root.
    pub fn endpoint(&self, prefix: &str) -> TransferEndpoint {
        TransferEndpoint::new(&self.repository.name, &self.repository.root, prefix)
            .with_credentials(self.repository.credentials.clone())
    }
}

impl std::fmt::Debug for RegisteredRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredRepository")
            .field("repository", &self.repository)
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

/// Every configured repository, keyed by name.
///
/// `hostname` identifies this machine; local mirrors bound to another host
/// are known but never probed. Without a hostname every bound mirror is remote.
#[derive(Debug, Default)]
pub struct RepositoryRegistry {
    entries: Vec<RegisteredRepository>,
    hostname: Option<String>,
}

impl RepositoryRegistry {
    pub fn new(hostname: Option<String>) -> Self {
        Self {
            entries: Vec::new(),
            hostname,
        }
    }

    /// Build stores for every configured repository.
    pub async fn from_config(config: &AppConfig, hostname: Option<&str>) -> SyncResult<Self> {
        config
            .validate()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        let mut registry = Self::new(hostname.map(str::to_string));
        for repo_config in &config.repositories {
            let profile = repo_config.credentials.as_ref().map(|c| c.expose());
            let store = alyx_storage::from_config(&repo_config.storage, profile)
                .await
                .map_err(|e| {
                    SyncError::Config(format!("repository {}: {e}", repo_config.name))
                })?;
            registry.register(repo_config.to_repository(), store)?;
        }
        Ok(registry)
    }

    /// Add a repository. Names must be unique.
    pub fn register(
        &mut self,
        repository: Repository,
        store: Arc<dyn ObjectStore>,
    ) -> SyncResult<()> {
        if self.entries.iter().any(|e| e.repository.name == repository.name) {
            return Err(SyncError::Config(format!(
                "duplicate repository name: {}",
                repository.name
            )));
        }
        debug!(repository = %repository.name, kind = %repository.kind, backend = store.backend_name(), "registered repository");
        self.entries.push(RegisteredRepository { repository, store });
        self.entries
            .sort_by(|a, b| a.repository.name.cmp(&b.repository.name));
        Ok(())
    }

    /// Record every repository in the catalog so file records can reference it.
    pub async fn publish(&self, catalog: &dyn CatalogStore) -> SyncResult<()> {
        for entry in &self.entries {
            catalog.upsert_repository(&entry.repository).await?;
        }
        Ok(())
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Look up a repository. Unknown names are configuration errors.
    pub fn get(&self, name: &str) -> SyncResult<&RegisteredRepository> {
        self.find(name)
            .ok_or_else(|| SyncError::Config(format!("unknown repository: {name}")))
    }

    pub fn find(&self, name: &str) -> Option<&RegisteredRepository> {
        self.entries.iter().find(|e| e.repository.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredRepository> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether this machine can probe the named repository.
    pub fn is_reachable(&self, name: &str) -> bool {
        self.find(name)
            .is_some_and(|e| e.repository.is_reachable_from(self.hostname()))
    }

    /// Reachable repositories holding data for `lab`.
    ///
    /// Personal repositories are left out unless named in `include`.
    pub fn for_lab(&self, lab: &str, include: &[String]) -> Vec<&RegisteredRepository> {
        self.entries
            .iter()
            .filter(|e| e.repository.is_reachable_from(self.hostname()))
            .filter(|e| e.repository.serves_lab(lab))
            .filter(|e| !e.repository.is_personal || include.contains(&e.repository.name))
            .collect()
    }

    /// Object stores by repository name, for in-process transfers.
    pub fn stores(&self) -> HashMap<String, Arc<dyn ObjectStore>> {
        self.entries
            .iter()
            .map(|e| (e.repository.name.clone(), e.store.clone()))
            .collect()
    }
}
