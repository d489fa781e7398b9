//! Storage repository descriptions.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// The kind of storage backend a repository lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepositoryKind {
    /// POSIX file server written by the acquisition pipeline.
    LocalMirror,
    /// Archival mirror (tape-backed mount).
    TapeArchive,
    /// Cloud object store bucket.
    CloudBucket,
}

impl RepositoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalMirror => "local-mirror",
            Self::TapeArchive => "tape-archive",
            Self::CloudBucket => "cloud-bucket",
        }
    }

    /// Rank used when choosing between source repositories. Higher wins.
    pub fn rank(&self) -> u8 {
        match self {
            Self::LocalMirror => 2,
            Self::TapeArchive => 1,
            Self::CloudBucket => 0,
        }
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepositoryKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "local-mirror" => Ok(Self::LocalMirror),
            "tape-archive" => Ok(Self::TapeArchive),
            "cloud-bucket" => Ok(Self::CloudBucket),
            other => Err(crate::Error::InvalidRepository(format!(
                "unknown repository kind: {other}"
            ))),
        }
    }
}

/// Opaque credential blob for a repository (profile name, key reference, ...).
///
/// Never printed in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credentials").field(&"<redacted>").finish()
    }
}

/// A storage backend known to the catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Repository {
    /// Unique repository name (e.g. `flatiron_cortexlab`, `aws_cortexlab`).
    pub name: String,
    pub kind: RepositoryKind,
    /// Absolute path or bucket URI of the repository root.
    pub root: String,
    /// Host that serves a local mirror, if any.
    pub hostname: Option<String>,
    /// Lab-owned, ephemeral location excluded from default-scope reconciliation.
    pub is_personal: bool,
    /// Trusted source copy, written first by the acquisition pipeline.
    pub authoritative: bool,
    /// Labs whose data this repository holds. Empty means every lab.
    pub labs: Vec<String>,
    pub credentials: Option<Credentials>,
}

impl Repository {
    /// Whether this repository holds data for the given lab.
    pub fn serves_lab(&self, lab: &str) -> bool {
        self.labs.is_empty() || self.labs.iter().any(|l| l == lab)
    }

    /// Whether this machine can probe the repository directly.
    ///
    /// Only local mirrors are host-bound; tape and cloud are reachable from anywhere.
    /// A bound mirror is unreachable when this machine's name is unknown.
    pub fn is_reachable_from(&self, hostname: Option<&str>) -> bool {
        match (self.kind, self.hostname.as_deref()) {
            (RepositoryKind::LocalMirror, Some(owner)) => hostname == Some(owner),
            _ => true,
        }
    }

    /// Compare source priority: authoritative first, then kind rank.
    pub fn priority_cmp(&self, other: &Repository) -> Ordering {
        (self.authoritative, self.kind.rank()).cmp(&(other.authoritative, other.kind.rank()))
    }

    /// Whether this repository may act as sync source for `other`.
    pub fn outranks(&self, other: &Repository) -> bool {
        self.priority_cmp(other) == Ordering::Greater
    }
}
