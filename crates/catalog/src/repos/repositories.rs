//! Repository (storage backend) bookkeeping.

use crate::error::CatalogResult;
use alyx_core::Repository;
use async_trait::async_trait;

/// Storage backends known to the catalog.
#[async_trait]
pub trait RepositoryRepo: Send + Sync {
    /// Insert or refresh a repository description. Credentials are not persisted.
    async fn upsert_repository(&self, repository: &Repository) -> CatalogResult<()>;

    async fn get_repository(&self, name: &str) -> CatalogResult<Option<Repository>>;

    /// All repositories ordered by name.
    async fn list_repositories(&self) -> CatalogResult<Vec<Repository>>;
}
