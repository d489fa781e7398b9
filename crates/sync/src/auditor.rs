//! Data-consistency auditor.
//!
//! Compares each dataset's file records with size and hash probes of the
//! canonical path. Safe repairs are applied on the spot; anything that would
//! require choosing between copies is reported and left alone.

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::reconcile::{expected_path, load_datasets, load_records, load_sessions};
use crate::registry::RegisteredRepository;
use alyx_catalog::DatasetFilter;
use alyx_catalog::repos::{DatasetRepo, FileRecordRepo};
use alyx_core::{Dataset, FileRecord, Provenance, Session, SizeStatus, invert_path};
use alyx_storage::{StorageError, StorageProbe};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Severity of a finding, lowest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Flag,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Flag => "FLAG",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// No file record on any authoritative repository.
    NoAuthoritativeRecord,
    /// Records on more than one authoritative repository.
    MultipleAuthoritativeRecords,
    /// More than one record for one (dataset, repository).
    DuplicateRecords,
    /// Flagged present but absent.
    MissingFile,
    /// Secondary copy size differs from the catalog.
    SizeMismatch,
    /// Secondary copy hash differs from the catalog.
    HashMismatch,
    /// Flagged absent but present and valid; flag set.
    FlagRepaired,
    /// Stored path differed from the canonical one; path rewritten.
    PathRepaired,
    /// Dataset size taken from the authoritative copy.
    SizeAdopted,
    /// Dataset hash taken from the authoritative copy.
    HashAdopted,
    /// Authoritative copy is a genuine zero-byte file.
    ConfirmedEmpty,
}

impl FindingKind {
    pub fn severity(self) -> Severity {
        match self {
            Self::NoAuthoritativeRecord
            | Self::MultipleAuthoritativeRecords
            | Self::DuplicateRecords => Severity::Flag,
            Self::MissingFile | Self::SizeMismatch | Self::HashMismatch => Severity::Warn,
            Self::FlagRepaired
            | Self::PathRepaired
            | Self::SizeAdopted
            | Self::HashAdopted
            | Self::ConfirmedEmpty => Severity::Info,
        }
    }
}

/// One audit observation.
#[derive(Clone, Debug, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub kind: FindingKind,
    pub dataset_id: Uuid,
    pub repository: Option<String>,
    pub message: String,
}

impl Finding {
    fn new(
        kind: FindingKind,
        dataset_id: Uuid,
        repository: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: kind.severity(),
            kind,
            dataset_id,
            repository: repository.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} dataset={}", self.severity, self.message, self.dataset_id)?;
        if let Some(repository) = &self.repository {
            write!(f, " repository={repository}")?;
        }
        Ok(())
    }
}

/// A file in a session directory that no dataset accounts for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnregisteredFile {
    pub repository: String,
    pub path: String,
    pub reason: String,
}

/// Probe result for one copy.
struct Observed {
    size: u64,
    hash: Option<String>,
}

pub struct Auditor<'a> {
    ctx: &'a SyncContext,
}

impl<'a> Auditor<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Audit every dataset matching `filter`. Findings are ordered by
    /// descending severity.
    pub async fn audit(&self, filter: &DatasetFilter, dry_run: bool) -> SyncResult<Vec<Finding>> {
        let catalog = self.ctx.catalog.as_ref();
        let batch_size = self.ctx.config.sync.batch_size;
        let datasets = load_datasets(catalog, filter, batch_size).await?;
        let sessions = load_sessions(catalog, &datasets).await?;
        let records = load_records(catalog, &datasets, batch_size).await?;

        let mut by_dataset: HashMap<Uuid, Vec<&FileRecord>> = HashMap::new();
        for recs in records.values() {
            for record in recs {
                by_dataset.entry(record.dataset_id).or_default().push(record);
            }
        }

        let mut findings = Vec::new();
        for dataset in datasets {
            let Some(session) = sessions.get(&dataset.session_id) else {
                warn!(dataset_id = %dataset.id, "dataset references an unknown session, not audited");
                continue;
            };
            let path = match expected_path(session, &dataset) {
                Ok(path) => path,
                Err(e) => {
                    warn!(dataset_id = %dataset.id, error = %e, "cannot derive canonical path, not audited");
                    continue;
                }
            };
            let mut own = by_dataset.remove(&dataset.id).unwrap_or_default();
            own.sort_by(|a, b| a.repository.cmp(&b.repository).then(a.id.cmp(&b.id)));

            self.audit_dataset(dataset, &path, &own, dry_run, &mut findings)
                .await?;
        }

        findings.sort_by(|a, b| b.severity.cmp(&a.severity));
        let flags = findings.iter().filter(|f| f.severity == Severity::Flag).count();
        let warns = findings.iter().filter(|f| f.severity == Severity::Warn).count();
        info!(findings = findings.len(), flags, warns, dry_run, "audit complete");
        Ok(findings)
    }

    async fn audit_dataset(
        &self,
        mut dataset: Dataset,
        path: &str,
        records: &[&FileRecord],
        dry_run: bool,
        findings: &mut Vec<Finding>,
    ) -> SyncResult<()> {
        let registry = &self.ctx.registry;

        // Group by repository; duplicates are flagged and excluded from repair.
        let mut singles: Vec<(&RegisteredRepository, &FileRecord)> = Vec::new();
        let mut authoritative_records = 0usize;
        for group in records.chunk_by(|a, b| a.repository == b.repository) {
            let repo_name = &group[0].repository;
            let Some(repo) = registry.find(repo_name) else {
                debug!(dataset_id = %dataset.id, repository = %repo_name, "record on unconfigured repository ignored");
                continue;
            };
            if repo.repository.authoritative {
                authoritative_records += group.len();
            }
            if group.len() > 1 {
                let paths: Vec<&str> = group.iter().map(|r| r.relative_path.as_str()).collect();
                warn!(dataset_id = %dataset.id, repository = %repo_name, records = group.len(), "duplicate file records");
                findings.push(Finding::new(
                    FindingKind::DuplicateRecords,
                    dataset.id,
                    Some(repo_name),
                    format!("{} records for one repository: {}", group.len(), paths.join(", ")),
                ));
                continue;
            }
            singles.push((repo, group[0]));
        }

        match authoritative_records {
            0 => findings.push(Finding::new(
                FindingKind::NoAuthoritativeRecord,
                dataset.id,
                None,
                "no file record on an authoritative repository",
            )),
            1 => {}
            n => findings.push(Finding::new(
                FindingKind::MultipleAuthoritativeRecords,
                dataset.id,
                None,
                format!("{n} file records on authoritative repositories"),
            )),
        }

        // Authoritative copies first so secondaries compare against adopted values.
        singles.sort_by_key(|(repo, _)| !repo.repository.authoritative);
        let adopt = authoritative_records == 1;

        for (repo, record) in singles {
            if !registry.is_reachable(repo.name()) {
                debug!(dataset_id = %dataset.id, repository = %repo.name(), "repository not reachable from this host");
                continue;
            }
            let now = OffsetDateTime::now_utc();

            if record.relative_path != path {
                findings.push(Finding::new(
                    FindingKind::PathRepaired,
                    dataset.id,
                    Some(repo.name()),
                    format!("relative path {} rewritten to {path}", record.relative_path),
                ));
                if dry_run {
                    info!(dataset_id = %dataset.id, repository = %repo.name(), path, "DRY-RUN: would rewrite relative path");
                } else {
                    self.ctx
                        .catalog
                        .set_file_record_path(record.id, path, now)
                        .await?;
                    info!(dataset_id = %dataset.id, repository = %repo.name(), path, "rewrote relative path");
                }
            }

            let authoritative = repo.repository.authoritative && adopt;
            let hash_limit = dataset
                .is_hashable()
                .then_some(self.ctx.config.audit.hash_size_threshold);
            let observed = match self.observe(repo, path, hash_limit).await {
                Ok(observed) => observed,
                Err(e) => {
                    warn!(dataset_id = %dataset.id, repository = %repo.name(), error = %e, "probe failed, not audited this pass");
                    continue;
                }
            };

            let Some(observed) = observed else {
                if record.exists {
                    findings.push(Finding::new(
                        FindingKind::MissingFile,
                        dataset.id,
                        Some(repo.name()),
                        format!("flagged present but {path} is missing"),
                    ));
                    self.mark_missing(&dataset, repo, record, dry_run).await?;
                }
                continue;
            };

            let valid = if authoritative {
                self.adopt(&mut dataset, repo.name(), &observed, dry_run, findings)
                    .await?;
                true
            } else {
                self.compare(&dataset, repo.name(), record, &observed, findings)
            };

            if !valid && (record.exists || !record.is_invalidated()) {
                self.invalidate(&dataset, repo, record, dry_run).await?;
            } else if valid && !record.exists {
                findings.push(Finding::new(
                    FindingKind::FlagRepaired,
                    dataset.id,
                    Some(repo.name()),
                    "file present but flagged absent",
                ));
                if dry_run {
                    info!(dataset_id = %dataset.id, repository = %repo.name(), "DRY-RUN: would set exists=true");
                } else {
                    self.ctx
                        .catalog
                        .set_file_record_exists(&[record.id], true, now)
                        .await?;
                    info!(dataset_id = %dataset.id, repository = %repo.name(), "set exists=true");
                }
            }
        }
        Ok(())
    }

    /// Size and, up to `hash_limit` bytes, content hash of the copy. `None`
    /// if absent.
    async fn observe(
        &self,
        repo: &RegisteredRepository,
        path: &str,
        hash_limit: Option<u64>,
    ) -> Result<Option<Observed>, StorageError> {
        let size = match repo.store.size(path).await {
            Ok(size) => size,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let hash = if hash_limit.is_some_and(|limit| size <= limit) {
            Some(repo.store.content_hash(path).await?.to_hex())
        } else {
            debug!(repository = %repo.name(), path, size, "hash verification skipped");
            None
        };
        Ok(Some(Observed { size, hash }))
    }

    /// Take size and hash from the authoritative copy.
    async fn adopt(
        &self,
        dataset: &mut Dataset,
        repository: &str,
        observed: &Observed,
        dry_run: bool,
        findings: &mut Vec<Finding>,
    ) -> SyncResult<()> {
        let catalog = self.ctx.catalog.as_ref();
        let now = OffsetDateTime::now_utc();

        if dataset.file_size != Some(observed.size) {
            findings.push(Finding::new(
                FindingKind::SizeAdopted,
                dataset.id,
                Some(repository),
                format!("size {:?} updated to {}", dataset.file_size, observed.size),
            ));
            if dry_run {
                info!(dataset_id = %dataset.id, size = observed.size, "DRY-RUN: would update dataset size");
            } else {
                catalog
                    .update_dataset_size(dataset.id, observed.size, now)
                    .await?;
                info!(dataset_id = %dataset.id, size = observed.size, "updated dataset size");
            }
            dataset.file_size = Some(observed.size);
        }

        // With the size just adopted, an unknown status means an unconfirmed zero.
        if dataset.size_status() == SizeStatus::Unknown {
            findings.push(Finding::new(
                FindingKind::ConfirmedEmpty,
                dataset.id,
                Some(repository),
                "authoritative copy is empty",
            ));
            let update = Provenance {
                confirmed_empty_at: Some(now),
                ..Provenance::default()
            };
            if dry_run {
                info!(dataset_id = %dataset.id, "DRY-RUN: would mark dataset confirmed empty");
                dataset.provenance.merge(&update);
            } else {
                dataset.provenance = catalog.merge_provenance(dataset.id, &update).await?;
                info!(dataset_id = %dataset.id, "marked dataset confirmed empty");
            }
        }

        if let Some(hash) = &observed.hash
            && dataset.hash.as_deref() != Some(hash.as_str())
        {
            findings.push(Finding::new(
                FindingKind::HashAdopted,
                dataset.id,
                Some(repository),
                format!("hash {:?} updated to {hash}", dataset.hash),
            ));
            if dry_run {
                info!(dataset_id = %dataset.id, hash = %hash, "DRY-RUN: would update dataset hash");
            } else {
                catalog.update_dataset_hash(dataset.id, hash, now).await?;
                info!(dataset_id = %dataset.id, hash = %hash, "updated dataset hash");
            }
            dataset.hash = Some(hash.clone());
        }
        Ok(())
    }

    /// Check a secondary copy against the catalog. Reports a WARN only when
    /// the record claims the copy is good.
    fn compare(
        &self,
        dataset: &Dataset,
        repository: &str,
        record: &FileRecord,
        observed: &Observed,
        findings: &mut Vec<Finding>,
    ) -> bool {
        if let Some(expected) = dataset.file_size
            && expected != observed.size
        {
            if record.exists {
                findings.push(Finding::new(
                    FindingKind::SizeMismatch,
                    dataset.id,
                    Some(repository),
                    format!("size {} differs from catalog {expected}", observed.size),
                ));
            }
            return false;
        }
        if let (Some(expected), Some(actual)) = (&dataset.hash, &observed.hash)
            && !expected.eq_ignore_ascii_case(actual)
        {
            if record.exists {
                findings.push(Finding::new(
                    FindingKind::HashMismatch,
                    dataset.id,
                    Some(repository),
                    format!("hash {actual} differs from catalog {expected}"),
                ));
            }
            return false;
        }
        true
    }

    /// Mark a copy that disagrees with the catalog so the next incremental
    /// sync replaces it.
    async fn invalidate(
        &self,
        dataset: &Dataset,
        repo: &RegisteredRepository,
        record: &FileRecord,
        dry_run: bool,
    ) -> SyncResult<()> {
        if dry_run {
            info!(dataset_id = %dataset.id, repository = %repo.name(), "DRY-RUN: would invalidate copy and schedule resync");
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();
        let catalog = self.ctx.catalog.as_ref();
        catalog.invalidate_file_record(record.id, now).await?;
        catalog.touch_dataset(dataset.id, now).await?;
        warn!(dataset_id = %dataset.id, repository = %repo.name(), "invalidated copy, scheduled for resync");
        Ok(())
    }

    /// Flip the record to absent and bump the dataset so the next
    /// incremental sync picks it up.
    async fn mark_missing(
        &self,
        dataset: &Dataset,
        repo: &RegisteredRepository,
        record: &FileRecord,
        dry_run: bool,
    ) -> SyncResult<()> {
        if dry_run {
            info!(dataset_id = %dataset.id, repository = %repo.name(), "DRY-RUN: would set exists=false and schedule resync");
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();
        let catalog = self.ctx.catalog.as_ref();
        catalog
            .set_file_record_exists(&[record.id], false, now)
            .await?;
        catalog.touch_dataset(dataset.id, now).await?;
        warn!(dataset_id = %dataset.id, repository = %repo.name(), "set exists=false, scheduled for resync");
        Ok(())
    }

    /// List a session directory on `repository` and report files no
    /// registered dataset accounts for.
    pub async fn scan_session_files(
        &self,
        session: &Session,
        repository: &str,
    ) -> SyncResult<Vec<UnregisteredFile>> {
        let repo = self.ctx.registry.get(repository)?;
        let catalog = self.ctx.catalog.as_ref();
        let keys = repo.store.list(&session.relative_dir()).await?;

        let mut unregistered = Vec::new();
        for key in keys {
            let reason = match invert_path(&key) {
                Err(e) => Some(e.to_string()),
                Ok(parsed) => match parsed.dataset_id {
                    Some(id) => match catalog.get_dataset(id).await? {
                        Some(d) if d.session_id == session.id => None,
                        Some(_) => Some(format!("dataset {id} belongs to another session")),
                        None => Some(format!("dataset {id} not in catalog")),
                    },
                    None => {
                        let matches = catalog
                            .find_dataset(
                                session.id,
                                parsed.collection.as_deref(),
                                parsed.revision.as_deref(),
                                &parsed.name,
                            )
                            .await?;
                        match matches.len() {
                            1 => None,
                            0 => Some("not a recognized dataset path: no matching dataset".to_string()),
                            n => Some(format!("not a recognized dataset path: {n} datasets match")),
                        }
                    }
                },
            };
            if let Some(reason) = reason {
                debug!(repository, path = %key, reason = %reason, "unregistered file");
                unregistered.push(UnregisteredFile {
                    repository: repository.to_string(),
                    path: key,
                    reason,
                });
            }
        }
        info!(session_id = %session.id, repository, unregistered = unregistered.len(), "session directory scanned");
        Ok(unregistered)
    }
}
