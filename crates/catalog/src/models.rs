//! Database rows mapping to the catalog schema.

use crate::error::{CatalogError, CatalogResult};
use alyx_core::{Dataset, FileRecord, Provenance, Repository, RepositoryKind, Session, Watermark};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

// =============================================================================
// Repositories
// =============================================================================

/// Repository record. Credentials stay in configuration and are never stored.
#[derive(Debug, Clone, FromRow)]
pub struct RepositoryRow {
    pub name: String,
    pub kind: String,
    pub root: String,
    pub hostname: Option<String>,
    pub is_personal: bool,
    pub authoritative: bool,
    /// Comma separated; empty means every lab.
    pub labs: String,
}

impl RepositoryRow {
    pub fn from_domain(repo: &Repository) -> Self {
        Self {
            name: repo.name.clone(),
            kind: repo.kind.as_str().to_string(),
            root: repo.root.clone(),
            hostname: repo.hostname.clone(),
            is_personal: repo.is_personal,
            authoritative: repo.authoritative,
            labs: repo.labs.join(","),
        }
    }

    pub fn into_domain(self) -> CatalogResult<Repository> {
        let kind: RepositoryKind = self.kind.parse().map_err(|e: alyx_core::Error| {
            CatalogError::Corrupt {
                table: "repositories",
                detail: e.to_string(),
            }
        })?;
        Ok(Repository {
            name: self.name,
            kind,
            root: self.root,
            hostname: self.hostname,
            is_personal: self.is_personal,
            authoritative: self.authoritative,
            labs: self
                .labs
                .split(',')
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            credentials: None,
        })
    }
}

// =============================================================================
// Sessions
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: Uuid,
    pub lab: String,
    pub subject: String,
    pub start_date: Date,
    pub number: i64,
    pub modified_at: OffsetDateTime,
}

impl SessionRow {
    pub fn into_domain(self) -> CatalogResult<Session> {
        let number = u16::try_from(self.number).map_err(|_| CatalogError::Corrupt {
            table: "sessions",
            detail: format!("session number {} out of range", self.number),
        })?;
        Ok(Session {
            id: self.session_id,
            lab: self.lab,
            subject: self.subject,
            start_date: self.start_date,
            number,
            modified_at: self.modified_at,
        })
    }
}

// =============================================================================
// Datasets
// =============================================================================

/// Dataset record with provenance flattened into typed columns.
#[derive(Debug, Clone, FromRow)]
pub struct DatasetRow {
    pub dataset_id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub collection: Option<String>,
    pub revision: Option<String>,
    pub file_size: Option<i64>,
    pub hash: Option<String>,
    pub file_size_updated_at: Option<OffsetDateTime>,
    pub hash_updated_at: Option<OffsetDateTime>,
    pub confirmed_empty_at: Option<OffsetDateTime>,
    pub aggregate_hash: Option<String>,
    pub default_dataset: bool,
    pub modified_at: OffsetDateTime,
}

impl DatasetRow {
    pub fn into_domain(self) -> CatalogResult<Dataset> {
        let file_size = self
            .file_size
            .map(|size| {
                u64::try_from(size).map_err(|_| CatalogError::Corrupt {
                    table: "datasets",
                    detail: format!("negative file_size {size} for {}", self.dataset_id),
                })
            })
            .transpose()?;
        Ok(Dataset {
            id: self.dataset_id,
            session_id: self.session_id,
            name: self.name,
            collection: self.collection,
            revision: self.revision,
            file_size,
            hash: self.hash,
            provenance: Provenance {
                file_size_updated_at: self.file_size_updated_at,
                hash_updated_at: self.hash_updated_at,
                confirmed_empty_at: self.confirmed_empty_at,
                aggregate_hash: self.aggregate_hash,
            },
            default_dataset: self.default_dataset,
            modified_at: self.modified_at,
        })
    }
}

// =============================================================================
// File records
// =============================================================================

/// File record. The flag column is `exists_flag` since `EXISTS` is reserved.
#[derive(Debug, Clone, FromRow)]
pub struct FileRecordRow {
    pub record_id: Uuid,
    pub dataset_id: Uuid,
    pub repository: String,
    pub relative_path: String,
    pub exists_flag: bool,
    pub invalidated_at: Option<OffsetDateTime>,
    pub modified_at: OffsetDateTime,
}

impl From<FileRecordRow> for FileRecord {
    fn from(row: FileRecordRow) -> Self {
        Self {
            id: row.record_id,
            dataset_id: row.dataset_id,
            repository: row.repository,
            relative_path: row.relative_path,
            exists: row.exists_flag,
            invalidated_at: row.invalidated_at,
            modified_at: row.modified_at,
        }
    }
}

// =============================================================================
// Watermarks
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct WatermarkRow {
    pub watermark_id: i64,
    pub channel: String,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
}

impl From<WatermarkRow> for Watermark {
    fn from(row: WatermarkRow) -> Self {
        Self {
            channel: row.channel,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}
