//! Sync error types.

use alyx_catalog::CatalogError;
use alyx_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while planning, transferring or auditing.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Domain(#[from] alyx_core::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transfer failed for session {session_id} with status {status}: {command}")]
    TransferFailed {
        session_id: Uuid,
        status: i32,
        command: String,
    },
}

impl SyncError {
    /// Whether the error aborts a whole run rather than one session or dataset.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Catalog(_) | Self::Config(_))
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
