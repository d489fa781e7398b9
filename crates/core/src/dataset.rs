//! Dataset records, names and provenance.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// A parsed dataset file name: `[_namespace_]object.attribute[.extra...].extension`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatasetName {
    pub namespace: Option<String>,
    pub object: String,
    pub attribute: String,
    pub extra: Vec<String>,
    pub extension: String,
}

impl DatasetName {
    /// Parse a dataset file name.
    pub fn parse(name: &str) -> crate::Result<Self> {
        if name.is_empty() || name.contains('/') {
            return Err(crate::Error::InvalidDatasetName(name.to_string()));
        }

        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() < 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(crate::Error::InvalidDatasetName(format!(
                "expected object.attribute.extension, got {name}"
            )));
        }

        let (namespace, object) = match parts[0].strip_prefix('_') {
            Some(rest) => match rest.split_once('_') {
                Some((ns, obj)) if !ns.is_empty() && !obj.is_empty() => {
                    (Some(ns.to_string()), obj.to_string())
                }
                _ => {
                    return Err(crate::Error::InvalidDatasetName(format!(
                        "malformed namespace in {name}"
                    )));
                }
            },
            None => (None, parts[0].to_string()),
        };

        let last = parts.len() - 1;
        Ok(Self {
            namespace,
            object,
            attribute: parts[1].to_string(),
            extra: parts[2..last].iter().map(|s| s.to_string()).collect(),
            extension: parts[last].to_string(),
        })
    }

    /// Everything before the final extension.
    pub fn stem(&self) -> String {
        let mut stem = match &self.namespace {
            Some(ns) => format!("_{ns}_{}.{}", self.object, self.attribute),
            None => format!("{}.{}", self.object, self.attribute),
        };
        for extra in &self.extra {
            stem.push('.');
            stem.push_str(extra);
        }
        stem
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stem(), self.extension)
    }
}

/// Typed provenance flags stashed on a dataset by consistency sweeps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub file_size_updated_at: Option<OffsetDateTime>,
    pub hash_updated_at: Option<OffsetDateTime>,
    pub confirmed_empty_at: Option<OffsetDateTime>,
    /// Hash over several files; per-file hash verification does not apply.
    pub aggregate_hash: Option<String>,
}

impl Provenance {
    /// Merge `other` into `self`: fields set in `other` win, absent fields are kept.
    pub fn merge(&mut self, other: &Provenance) {
        if other.file_size_updated_at.is_some() {
            self.file_size_updated_at = other.file_size_updated_at;
        }
        if other.hash_updated_at.is_some() {
            self.hash_updated_at = other.hash_updated_at;
        }
        if other.confirmed_empty_at.is_some() {
            self.confirmed_empty_at = other.confirmed_empty_at;
        }
        if other.aggregate_hash.is_some() {
            self.aggregate_hash = other.aggregate_hash.clone();
        }
    }
}

/// What is known about a dataset's size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeStatus {
    /// Never probed, or zero without confirmation.
    Unknown,
    /// Probed and found to be genuinely empty.
    ConfirmedEmpty,
    NonZero,
}

/// Logical record for one versioned data file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dataset {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub collection: Option<String>,
    pub revision: Option<String>,
    pub file_size: Option<u64>,
    pub hash: Option<String>,
    pub provenance: Provenance,
    /// Current revision is canonical for its (collection, name) slot.
    pub default_dataset: bool,
    pub modified_at: OffsetDateTime,
}

impl Dataset {
    pub fn size_status(&self) -> SizeStatus {
        match self.file_size {
            None => SizeStatus::Unknown,
            Some(0) if self.provenance.confirmed_empty_at.is_some() => SizeStatus::ConfirmedEmpty,
            Some(0) => SizeStatus::Unknown,
            Some(_) => SizeStatus::NonZero,
        }
    }

    /// Whether a per-file content hash is meaningful for this dataset.
    pub fn is_hashable(&self) -> bool {
        self.provenance.aggregate_hash.is_none()
    }
}
