//! Bulk transfer driver: one session directory from one repository to another.

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::reconcile::{expected_path, load_datasets, load_records, probe_size};
use crate::registry::RegisteredRepository;
use alyx_catalog::DatasetFilter;
use alyx_catalog::repos::FileRecordRepo;
use alyx_core::{Dataset, FileRecord, Session};
use alyx_storage::{ObjectStore, StorageError, StorageProbe, TransferRequest};
use serde::Serialize;
use std::collections::HashMap;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-dataset result of a session transfer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Absent on the destination before, present after.
    pub added: u64,
    /// Present before, but with a different size or invalidated by an audit.
    pub modified: u64,
    pub unchanged: u64,
    /// Present on the source but still absent, or unprobeable, afterwards.
    pub errors: u64,
}

impl SyncOutcome {
    pub fn absorb(&mut self, other: &SyncOutcome) {
        self.added += other.added;
        self.modified += other.modified;
        self.unchanged += other.unchanged;
        self.errors += other.errors;
    }
}

/// What the driver knows about one dataset before the transfer.
struct Candidate {
    dataset: Dataset,
    path: String,
    on_source: bool,
    /// `None` when absent on the destination.
    dest_size: Option<u64>,
    source_size: Option<u64>,
    /// The destination copy was invalidated by an audit and must be replaced.
    replace: bool,
}

impl Candidate {
    fn changes_existing(&self) -> bool {
        self.replace || self.dest_size != self.source_size
    }
}

/// Runs bulk transfers and reconciles destination records with the result.
pub struct TransferDriver<'a> {
    ctx: &'a SyncContext,
}

impl<'a> TransferDriver<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Mirror `session`'s directory from `source` to `dest`.
    ///
    /// A failed transfer returns [`SyncError::TransferFailed`] and leaves every
    /// record untouched. On success, destination records are created or
    /// flipped according to a fresh probe of the destination, never the
    /// transfer tool's exit status alone.
    pub async fn sync_session(
        &self,
        session: &Session,
        source: &str,
        dest: &str,
        dry_run: bool,
    ) -> SyncResult<SyncOutcome> {
        let source_repo = self.ctx.registry.get(source)?;
        let dest_repo = self.ctx.registry.get(dest)?;
        let dir = session.relative_dir();

        let catalog = self.ctx.catalog.as_ref();
        let datasets = load_datasets(
            catalog,
            &DatasetFilter::by_sessions([session.id]),
            self.ctx.config.sync.batch_size,
        )
        .await?;
        let records = load_records(catalog, &datasets, self.ctx.config.sync.batch_size).await?;
        let candidates = self
            .survey(session, datasets, &records, source_repo, dest_repo)
            .await;
        self.clear_invalidated(session, dest_repo, &candidates, dry_run)
            .await?;

        let request = TransferRequest {
            source: source_repo.endpoint(&dir),
            dest: dest_repo.endpoint(&dir),
            delete_extraneous: true,
            dry_run,
            quiet: true,
        };
        let command = self.ctx.transfer.describe(&request);
        info!(session_id = %session.id, source, dest, dry_run, command = %command, "starting transfer");

        let output = match self.ctx.transfer.transfer(&request).await {
            Ok(output) => output,
            Err(StorageError::Config(msg)) => return Err(SyncError::Config(msg)),
            Err(e) => {
                error!(session_id = %session.id, source, dest, command = %command, error = %e, "transfer could not run");
                return Err(SyncError::TransferFailed {
                    session_id: session.id,
                    status: -1,
                    command: format!("{command}: {e}"),
                });
            }
        };
        if !output.success() {
            error!(
                session_id = %session.id,
                source,
                dest,
                status = output.exit_status,
                command = %command,
                log = %output.log.trim_end(),
                "transfer failed, records left unchanged"
            );
            return Err(SyncError::TransferFailed {
                session_id: session.id,
                status: output.exit_status,
                command,
            });
        }
        debug!(session_id = %session.id, log = %output.log.trim_end(), "transfer output");

        if dry_run {
            return Ok(Self::planned_outcome(session, dest, &candidates));
        }
        self.record_result(session, dest_repo, &candidates, &records)
            .await
    }

    /// Probe every dataset of the session on both sides.
    async fn survey(
        &self,
        session: &Session,
        datasets: Vec<Dataset>,
        records: &HashMap<(Uuid, String), Vec<FileRecord>>,
        source: &RegisteredRepository,
        dest: &RegisteredRepository,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            let path = match expected_path(session, &dataset) {
                Ok(path) => path,
                Err(e) => {
                    warn!(dataset_id = %dataset.id, error = %e, "cannot derive canonical path, ignoring dataset");
                    continue;
                }
            };
            let source_size = probe_size(&source.store, &path).await;
            let dest_size = probe_size(&dest.store, &path).await;
            let (on_source, source_size) = match source_size {
                Ok(size) => (size.is_some(), size),
                Err(e) => {
                    warn!(dataset_id = %dataset.id, repository = %source.name(), error = %e, "source probe failed");
                    (false, None)
                }
            };
            let dest_size = match dest_size {
                Ok(size) => size,
                Err(e) => {
                    warn!(dataset_id = %dataset.id, repository = %dest.name(), error = %e, "destination probe failed, treating as absent");
                    None
                }
            };
            let replace = on_source
                && dest_size.is_some()
                && records
                    .get(&(dataset.id, dest.name().to_string()))
                    .is_some_and(|r| r.iter().any(FileRecord::is_invalidated));
            candidates.push(Candidate {
                dataset,
                path,
                on_source,
                dest_size,
                source_size,
                replace,
            });
        }
        candidates
    }

    /// Remove destination copies an audit invalidated so the transfer
    /// rewrites them even when size and timestamps look current.
    async fn clear_invalidated(
        &self,
        session: &Session,
        dest: &RegisteredRepository,
        candidates: &[Candidate],
        dry_run: bool,
    ) -> SyncResult<()> {
        for c in candidates.iter().filter(|c| c.replace) {
            if dry_run {
                info!(session_id = %session.id, dataset_id = %c.dataset.id, repository = %dest.name(), "DRY-RUN: would remove invalidated copy before transfer");
                continue;
            }
            match dest.store.delete(&c.path).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {
                    info!(session_id = %session.id, dataset_id = %c.dataset.id, repository = %dest.name(), path = %c.path, "removed invalidated copy before transfer");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn planned_outcome(session: &Session, dest: &str, candidates: &[Candidate]) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        for c in candidates.iter().filter(|c| c.on_source) {
            match c.dest_size {
                None => {
                    outcome.added += 1;
                    info!(session_id = %session.id, dataset_id = %c.dataset.id, repository = dest, "DRY-RUN: would copy and set exists=true");
                }
                Some(_) if c.changes_existing() => outcome.modified += 1,
                Some(_) => outcome.unchanged += 1,
            }
        }
        outcome
    }

    /// Align destination records with a post-transfer probe.
    async fn record_result(
        &self,
        session: &Session,
        dest: &RegisteredRepository,
        candidates: &[Candidate],
        records: &HashMap<(Uuid, String), Vec<FileRecord>>,
    ) -> SyncResult<SyncOutcome> {
        let catalog = self.ctx.catalog.as_ref();
        let now = OffsetDateTime::now_utc();
        let mut outcome = SyncOutcome::default();

        for c in candidates {
            let existing = records
                .get(&(c.dataset.id, dest.name().to_string()))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            if existing.len() > 1 {
                warn!(dataset_id = %c.dataset.id, repository = %dest.name(), records = existing.len(), "conflicting records, leaving bookkeeping for review");
                continue;
            }

            let present = match dest.store.exists(&c.path).await {
                Ok(present) => present,
                Err(e) => {
                    outcome.errors += 1;
                    warn!(dataset_id = %c.dataset.id, repository = %dest.name(), error = %e, "post-transfer probe failed");
                    continue;
                }
            };

            if c.on_source {
                match (present, c.dest_size) {
                    (false, _) => {
                        outcome.errors += 1;
                        error!(session_id = %session.id, dataset_id = %c.dataset.id, repository = %dest.name(), "file missing on destination after transfer");
                    }
                    (true, None) => outcome.added += 1,
                    (true, Some(_)) if c.changes_existing() => outcome.modified += 1,
                    (true, Some(_)) => outcome.unchanged += 1,
                }
            } else if existing.is_empty() {
                // Not part of this transfer and not yet tracked here.
                continue;
            }

            match existing.first() {
                None => {
                    catalog
                        .get_or_create_file_record(c.dataset.id, dest.name(), &c.path, present, now)
                        .await?;
                    info!(dataset_id = %c.dataset.id, repository = %dest.name(), exists = present, "created file record");
                }
                Some(record) if record.exists != present => {
                    catalog
                        .set_file_record_exists(&[record.id], present, now)
                        .await?;
                    info!(dataset_id = %c.dataset.id, repository = %dest.name(), exists = present, "updated exists flag");
                }
                Some(_) => {}
            }
        }

        info!(
            session_id = %session.id,
            repository = %dest.name(),
            added = outcome.added,
            modified = outcome.modified,
            unchanged = outcome.unchanged,
            errors = outcome.errors,
            "session synced"
        );
        Ok(outcome)
    }
}
