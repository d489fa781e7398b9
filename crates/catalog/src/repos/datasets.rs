//! Dataset repository trait and query criteria.

use crate::error::CatalogResult;
use alyx_core::{Dataset, Provenance};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Structured dataset selection.
///
/// `None` leaves a criterion unconstrained; `Some(vec![])` matches nothing.
#[derive(Debug, Clone, Default)]
pub struct DatasetFilter {
    pub ids: Option<Vec<Uuid>>,
    pub session_ids: Option<Vec<Uuid>>,
    /// Inclusive lower bound on `modified_at`.
    pub modified_after: Option<OffsetDateTime>,
    pub labs: Option<Vec<String>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl DatasetFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_ids(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn by_sessions(session_ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            session_ids: Some(session_ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn modified_after(at: OffsetDateTime) -> Self {
        Self {
            modified_after: Some(at),
            ..Self::default()
        }
    }

    /// Same criteria, one page further.
    pub fn page(&self, limit: u32, offset: u32) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
            ..self.clone()
        }
    }
}

/// Datasets: logical files independent of location.
#[async_trait]
pub trait DatasetRepo: Send + Sync {
    async fn create_dataset(&self, dataset: &Dataset) -> CatalogResult<()>;

    async fn get_dataset(&self, dataset_id: Uuid) -> CatalogResult<Option<Dataset>>;

    /// Datasets matching `filter`, ordered by `modified_at` then id.
    async fn list_datasets(&self, filter: &DatasetFilter) -> CatalogResult<Vec<Dataset>>;

    /// Find a dataset by session, collection, revision and name.
    async fn find_dataset(
        &self,
        session_id: Uuid,
        collection: Option<&str>,
        revision: Option<&str>,
        name: &str,
    ) -> CatalogResult<Vec<Dataset>>;

    /// Store a probed size and stamp `file_size_updated_at`.
    async fn update_dataset_size(
        &self,
        dataset_id: Uuid,
        file_size: u64,
        at: OffsetDateTime,
    ) -> CatalogResult<()>;

    /// Store a computed hash and stamp `hash_updated_at`.
    async fn update_dataset_hash(
        &self,
        dataset_id: Uuid,
        hash: &str,
        at: OffsetDateTime,
    ) -> CatalogResult<()>;

    /// Merge provenance flags without clobbering keys absent from `update`.
    async fn merge_provenance(
        &self,
        dataset_id: Uuid,
        update: &Provenance,
    ) -> CatalogResult<Provenance>;

    /// Bump `modified_at` so the next incremental sync selects the dataset.
    async fn touch_dataset(&self, dataset_id: Uuid, at: OffsetDateTime) -> CatalogResult<()>;
}
