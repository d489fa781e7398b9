//! Configuration types shared across crates.

use crate::repository::{Credentials, Repository, RepositoryKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Storage backend configuration for one repository.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// POSIX mount (local mirror or tape-backed archive).
    Filesystem {
        /// Repository root directory.
        path: PathBuf,
    },
    /// S3-compatible bucket.
    S3 {
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        region: Option<String>,
        /// Key prefix under which the repository root lives.
        prefix: Option<String>,
        /// Falls back to the default AWS credential chain if not set.
        access_key_id: Option<String>,
        secret_access_key: Option<Credentials>,
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err(crate::Error::Config("s3 bucket must not be empty".into()));
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(crate::Error::Config(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    )),
                }
            }
            StorageConfig::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err(crate::Error::Config(
                        "filesystem path must not be empty".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Root locator: an absolute path or an `s3://bucket/prefix` URI.
    pub fn root_locator(&self) -> String {
        match self {
            StorageConfig::Filesystem { path } => path.display().to_string(),
            StorageConfig::S3 { bucket, prefix, .. } => match prefix
                .as_deref()
                .map(|p| p.trim_matches('/'))
                .filter(|p| !p.is_empty())
            {
                Some(prefix) => format!("s3://{bucket}/{prefix}"),
                None => format!("s3://{bucket}"),
            },
        }
    }
}

/// Catalog database configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CatalogConfig {
    Sqlite {
        /// Database file path.
        path: PathBuf,
        #[serde(default = "default_busy_timeout_secs")]
        busy_timeout_secs: u64,
    },
}

fn default_busy_timeout_secs() -> u64 {
    30
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/catalog.db"),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

/// One configured repository.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    pub kind: RepositoryKind,
    pub storage: StorageConfig,
    /// Host serving a local mirror.
    pub hostname: Option<String>,
    #[serde(default)]
    pub is_personal: bool,
    /// Defaults to `kind == local-mirror && !is_personal`.
    pub authoritative: Option<bool>,
    /// Labs held by this repository; empty means every lab.
    #[serde(default)]
    pub labs: Vec<String>,
    pub credentials: Option<Credentials>,
}

impl RepositoryConfig {
    pub fn is_authoritative(&self) -> bool {
        self.authoritative
            .unwrap_or(self.kind == RepositoryKind::LocalMirror && !self.is_personal)
    }

    /// Build the domain description of this repository.
    pub fn to_repository(&self) -> Repository {
        Repository {
            name: self.name.clone(),
            kind: self.kind,
            root: self.storage.root_locator(),
            hostname: self.hostname.clone(),
            is_personal: self.is_personal,
            authoritative: self.is_authoritative(),
            labs: self.labs.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

/// Incremental sync configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Datasets fetched from the catalog per query.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Maximum number of sessions processed per run.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Watermark channel; defaults to `sync:{destination}`.
    #[serde(default)]
    pub watermark_channel: Option<String>,
}

fn default_batch_size() -> u32 {
    500
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            limit: None,
            watermark_channel: None,
        }
    }
}

/// Consistency audit configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Files above this size are not hashed.
    #[serde(default = "default_hash_size_threshold")]
    pub hash_size_threshold: u64,
}

fn default_hash_size_threshold() -> u64 {
    64 * 1024 * 1024
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            hash_size_threshold: default_hash_size_threshold(),
        }
    }
}

/// Which bulk copier moves session directories.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TransferTool {
    Rsync,
    AwsCli,
    /// In-process copy between configured object stores.
    #[default]
    Native,
}

/// Bulk transfer configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default)]
    pub tool: TransferTool,
    /// Override the executable (defaults to `rsync` or `aws`).
    #[serde(default)]
    pub program: Option<String>,
    /// Appended to every invocation, before the source and destination.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl AppConfig {
    /// Create a test configuration backed by the given catalog file.
    ///
    /// **For testing only.** No repositories, native transfers.
    pub fn for_testing(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog: CatalogConfig::Sqlite {
                path: catalog_path.into(),
                busy_timeout_secs: 5,
            },
            ..Self::default()
        }
    }

    pub fn repository(&self, name: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> crate::Result<()> {
        let mut seen = HashSet::new();
        for repo in &self.repositories {
            if repo.name.is_empty() {
                return Err(crate::Error::Config("repository name must not be empty".into()));
            }
            if !seen.insert(repo.name.as_str()) {
                return Err(crate::Error::Config(format!(
                    "duplicate repository name: {}",
                    repo.name
                )));
            }
            repo.storage
                .validate()
                .map_err(|e| crate::Error::Config(format!("repository {}: {e}", repo.name)))?;
        }

        if self.sync.batch_size == 0 {
            return Err(crate::Error::Config("sync.batch_size must be at least 1".into()));
        }
        if self.sync.limit == Some(0) {
            return Err(crate::Error::Config("sync.limit must be at least 1".into()));
        }
        if self
            .sync
            .watermark_channel
            .as_deref()
            .is_some_and(str::is_empty)
        {
            return Err(crate::Error::Config(
                "sync.watermark_channel must not be empty".into(),
            ));
        }
        Ok(())
    }
}
