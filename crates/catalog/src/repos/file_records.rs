//! File record repository trait.

use crate::error::CatalogResult;
use alyx_core::FileRecord;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Structured file record selection.
///
/// `None` leaves a criterion unconstrained; `Some(vec![])` matches nothing.
#[derive(Debug, Clone, Default)]
pub struct FileRecordFilter {
    pub dataset_ids: Option<Vec<Uuid>>,
    pub repositories: Option<Vec<String>>,
    pub exists: Option<bool>,
}

impl FileRecordFilter {
    pub fn for_datasets(dataset_ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            dataset_ids: Some(dataset_ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn repository(mut self, name: impl Into<String>) -> Self {
        self.repositories = Some(vec![name.into()]);
        self
    }

    pub fn exists(mut self, exists: bool) -> Self {
        self.exists = Some(exists);
        self
    }
}

/// File records: one claim per (dataset, repository).
///
/// Duplicates are representable on purpose; they surface as conflicts.
#[async_trait]
pub trait FileRecordRepo: Send + Sync {
    /// Insert a record unconditionally.
    async fn create_file_record(&self, record: &FileRecord) -> CatalogResult<()>;

    /// Return the first record for (dataset, repository), creating it if none exists.
    ///
    /// The boolean is `true` when a record was created.
    async fn get_or_create_file_record(
        &self,
        dataset_id: Uuid,
        repository: &str,
        relative_path: &str,
        exists: bool,
        at: OffsetDateTime,
    ) -> CatalogResult<(FileRecord, bool)>;

    async fn get_file_record(&self, record_id: Uuid) -> CatalogResult<Option<FileRecord>>;

    /// Records matching `filter`, ordered by dataset, repository and id.
    async fn list_file_records(&self, filter: &FileRecordFilter)
    -> CatalogResult<Vec<FileRecord>>;

    /// Bulk update of the existence flag. Setting it true also clears any
    /// invalidation. Returns the number of rows changed.
    async fn set_file_record_exists(
        &self,
        record_ids: &[Uuid],
        exists: bool,
        at: OffsetDateTime,
    ) -> CatalogResult<u64>;

    /// Mark a copy as present but not trustworthy: the flag goes false and
    /// the record carries `invalidated_at` until the flag is set true again.
    async fn invalidate_file_record(&self, record_id: Uuid, at: OffsetDateTime)
    -> CatalogResult<()>;

    async fn set_file_record_path(
        &self,
        record_id: Uuid,
        relative_path: &str,
        at: OffsetDateTime,
    ) -> CatalogResult<()>;
}
