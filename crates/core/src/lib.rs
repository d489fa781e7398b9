//! Core domain types and shared logic for Alyx data synchronization.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Repositories (storage backends) and their priority ordering
//! - Sessions, datasets and file records
//! - The canonical relative path convention and its inverse
//! - Content hashing
//! - Sync watermarks
//! - Configuration

pub mod config;
pub mod dataset;
pub mod error;
pub mod file_record;
pub mod hash;
pub mod path;
pub mod repository;
pub mod session;
pub mod watermark;

pub use dataset::{Dataset, DatasetName, Provenance, SizeStatus};
pub use error::{Error, Result};
pub use file_record::FileRecord;
pub use hash::{ContentHash, ContentHasher};
pub use path::{ParsedPath, canonical_relative_path, invert_path, session_relative_dir};
pub use repository::{Credentials, Repository, RepositoryKind};
pub use session::Session;
pub use watermark::Watermark;

use time::OffsetDateTime;

/// Normalize a timestamp for persistence: UTC, truncated to whole seconds.
///
/// Catalog timestamps are stored as RFC 3339 text, which only sorts
/// chronologically when every value shares the same offset and precision.
pub fn catalog_timestamp(at: OffsetDateTime) -> OffsetDateTime {
    let utc = at.to_offset(time::UtcOffset::UTC);
    utc.replace_nanosecond(0).unwrap_or(utc)
}
