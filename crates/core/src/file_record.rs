//! File record: the claim that a repository holds a copy of a dataset.

use time::OffsetDateTime;
use uuid::Uuid;

/// One (dataset, repository) pairing.
///
/// `exists = true` means the repository is believed to hold a valid copy at
/// `relative_path` below its root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub repository: String,
    pub relative_path: String,
    pub exists: bool,
    /// Set when an audit found the copy's content differs from the catalog.
    /// Cleared once the flag is set true again.
    pub invalidated_at: Option<OffsetDateTime>,
    pub modified_at: OffsetDateTime,
}

impl FileRecord {
    pub fn is_invalidated(&self) -> bool {
        self.invalidated_at.is_some()
    }
}
