//! Reconciliation engine.
//!
//! For every dataset in scope and every repository relevant to its lab, the
//! engine compares the catalog's file records with a size probe of the
//! canonical path and emits repair actions, grouped by session.

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::registry::RegisteredRepository;
use crate::scope::Scope;
use alyx_catalog::repos::{DatasetRepo, FileRecordRepo, SessionRepo};
use alyx_catalog::{CatalogStore, DatasetFilter, FileRecordFilter};
use alyx_core::{Dataset, FileRecord, Repository, Session, canonical_relative_path};
use serde::Serialize;
use alyx_storage::{ObjectStore, StorageError, StorageProbe};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::fmt;
use time::OffsetDateTime;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// A repair the engine wants applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairAction {
    /// No record for (dataset, repository); create one reflecting the probe.
    CreateRecord {
        dataset_id: Uuid,
        repository: String,
        relative_path: String,
        exists: bool,
    },
    /// Record says absent but a copy matching the catalog is there.
    SetExistsTrue {
        dataset_id: Uuid,
        record_id: Uuid,
        repository: String,
    },
    /// No usable copy on `dest`, one on a higher-priority `source`.
    Sync {
        dataset_id: Uuid,
        source: String,
        dest: String,
    },
    /// More than one record for (dataset, repository). Never auto-resolved.
    FlagConflict {
        dataset_id: Uuid,
        repository: String,
        record_ids: Vec<Uuid>,
    },
}

impl RepairAction {
    pub fn dataset_id(&self) -> Uuid {
        match self {
            Self::CreateRecord { dataset_id, .. }
            | Self::SetExistsTrue { dataset_id, .. }
            | Self::Sync { dataset_id, .. }
            | Self::FlagConflict { dataset_id, .. } => *dataset_id,
        }
    }
}

impl fmt::Display for RepairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateRecord {
                dataset_id,
                repository,
                relative_path,
                exists,
            } => write!(
                f,
                "CREATE_RECORD {dataset_id} on {repository} exists={exists} path={relative_path}"
            ),
            Self::SetExistsTrue {
                dataset_id,
                repository,
                ..
            } => write!(f, "SET_EXISTS_TRUE {dataset_id} on {repository}"),
            Self::Sync {
                dataset_id,
                source,
                dest,
            } => write!(f, "SYNC {dataset_id} {source} -> {dest}"),
            Self::FlagConflict {
                dataset_id,
                repository,
                record_ids,
            } => write!(
                f,
                "FLAG_CONFLICT {dataset_id} on {repository}: {} records",
                record_ids.len()
            ),
        }
    }
}

/// Actions for the datasets of one session.
#[derive(Clone, Debug)]
pub struct SessionPlan {
    pub session: Session,
    /// Latest modification among the session's datasets in scope.
    pub last_modified: OffsetDateTime,
    pub actions: Vec<RepairAction>,
}

/// A dataset left out of this pass, to be retried on the next.
#[derive(Clone, Debug, Serialize)]
pub struct SkippedDataset {
    pub dataset_id: Uuid,
    pub reason: String,
}

/// Output of [`ReconciliationEngine::plan_actions`].
#[derive(Clone, Debug, Default)]
pub struct Plan {
    /// Ascending by `last_modified`.
    pub sessions: Vec<SessionPlan>,
    pub skipped: Vec<SkippedDataset>,
    pub datasets_examined: usize,
}

impl Plan {
    pub fn actions(&self) -> impl Iterator<Item = &RepairAction> {
        self.sessions.iter().flat_map(|s| s.actions.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.actions().next().is_none()
    }
}

/// Planning options.
#[derive(Clone, Debug, Default)]
pub struct PlanOptions {
    /// Emit actions only for these repositories. Every reachable repository is
    /// still probed as a potential source. Naming a personal repository here
    /// brings it into scope.
    pub destinations: Option<Vec<String>>,
    /// Datasets fetched per catalog query; `0` uses the configured batch size.
    pub batch_size: u32,
}

/// Counts from [`ReconciliationEngine::apply`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub records_created: u64,
    pub flags_repaired: u64,
}

/// One repository's view of a dataset.
#[derive(Debug)]
pub(crate) struct RepoState<'a> {
    pub repository: &'a Repository,
    pub records: &'a [FileRecord],
    /// Holds a copy that can be trusted, see [`usable_copy`].
    pub present: bool,
}

/// Whether a copy of `probed` bytes can be trusted: it exists, agrees with
/// the catalog size when one is known, and no audit invalidated it.
pub(crate) fn usable_copy(probed: Option<u64>, expected: Option<u64>, records: &[FileRecord]) -> bool {
    match probed {
        None => false,
        Some(size) => {
            expected.is_none_or(|expected| expected == size)
                && !records.iter().any(FileRecord::is_invalidated)
        }
    }
}

/// Size of the object at `path`, `None` if absent.
pub(crate) async fn probe_size(
    store: &Arc<dyn ObjectStore>,
    path: &str,
) -> Result<Option<u64>, StorageError> {
    match store.size(path).await {
        Ok(size) => Ok(Some(size)),
        Err(StorageError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Canonical path of a dataset within its session.
pub fn expected_path(session: &Session, dataset: &Dataset) -> alyx_core::Result<String> {
    canonical_relative_path(
        &session.lab,
        &session.subject,
        session.start_date,
        session.number,
        dataset.collection.as_deref(),
        dataset.revision.as_deref(),
        &dataset.name,
        dataset.id,
    )
}

/// Fetch every dataset matching `filter`, `batch_size` rows per query.
pub(crate) async fn load_datasets(
    catalog: &dyn CatalogStore,
    filter: &DatasetFilter,
    batch_size: u32,
) -> SyncResult<Vec<Dataset>> {
    let batch_size = batch_size.max(1);
    let mut datasets = Vec::new();
    let mut offset = 0u32;
    loop {
        // A limit on the filter caps the total across pages.
        let want = match filter.limit {
            Some(limit) => batch_size.min(limit.saturating_sub(offset)),
            None => batch_size,
        };
        if want == 0 {
            break;
        }
        let page = catalog.list_datasets(&filter.page(want, offset)).await?;
        let fetched = page.len();
        datasets.extend(page);
        if fetched < want as usize {
            break;
        }
        offset = offset.saturating_add(want);
    }
    Ok(datasets)
}

/// Sessions owning `datasets`, by id.
pub(crate) async fn load_sessions(
    catalog: &dyn CatalogStore,
    datasets: &[Dataset],
) -> SyncResult<HashMap<Uuid, Session>> {
    let mut ids: Vec<Uuid> = datasets.iter().map(|d| d.session_id).collect();
    ids.sort();
    ids.dedup();
    let sessions = catalog.get_sessions(&ids).await?;
    Ok(sessions.into_iter().map(|s| (s.id, s)).collect())
}

/// File records of `datasets`, grouped by (dataset, repository).
pub(crate) async fn load_records(
    catalog: &dyn CatalogStore,
    datasets: &[Dataset],
    batch_size: u32,
) -> SyncResult<HashMap<(Uuid, String), Vec<FileRecord>>> {
    let mut grouped: HashMap<(Uuid, String), Vec<FileRecord>> = HashMap::new();
    for chunk in datasets.chunks(batch_size.max(1) as usize) {
        let filter = FileRecordFilter::for_datasets(chunk.iter().map(|d| d.id));
        for record in catalog.list_file_records(&filter).await? {
            grouped
                .entry((record.dataset_id, record.repository.clone()))
                .or_default()
                .push(record);
        }
    }
    Ok(grouped)
}

/// Highest-priority present repository that outranks `dest`.
///
/// Equal priorities resolve to the alphabetically first name.
pub(crate) fn pick_source<'a>(
    states: &[RepoState<'a>],
    dest: &Repository,
) -> Option<&'a Repository> {
    states
        .iter()
        .filter(|s| s.present && s.repository.outranks(dest))
        .map(|s| s.repository)
        .max_by(|a, b| a.priority_cmp(b).then_with(|| b.name.cmp(&a.name)))
}

/// Classify one dataset across the repositories it was probed on.
pub(crate) fn classify(
    dataset_id: Uuid,
    relative_path: &str,
    states: &[RepoState<'_>],
    destinations: Option<&[String]>,
) -> Vec<RepairAction> {
    let mut actions = Vec::new();

    for state in states {
        let name = &state.repository.name;
        if destinations.is_some_and(|d| !d.contains(name)) {
            continue;
        }

        match state.records {
            [] => actions.push(RepairAction::CreateRecord {
                dataset_id,
                repository: name.clone(),
                relative_path: relative_path.to_string(),
                exists: state.present,
            }),
            [record] => {
                if !record.exists && state.present {
                    actions.push(RepairAction::SetExistsTrue {
                        dataset_id,
                        record_id: record.id,
                        repository: name.clone(),
                    });
                }
            }
            records => {
                actions.push(RepairAction::FlagConflict {
                    dataset_id,
                    repository: name.clone(),
                    record_ids: records.iter().map(|r| r.id).collect(),
                });
                continue;
            }
        }

        if state.present {
            continue;
        }
        match pick_source(states, state.repository) {
            Some(source) => actions.push(RepairAction::Sync {
                dataset_id,
                source: source.name.clone(),
                dest: name.clone(),
            }),
            None => {
                if state.records.first().is_some_and(|r| r.exists) {
                    warn!(dataset_id = %dataset_id, repository = %name, "file flagged present but missing, and no source holds it");
                }
            }
        }
    }

    actions
}

/// Plans repairs by comparing catalog bookkeeping with storage probes.
pub struct ReconciliationEngine<'a> {
    ctx: &'a SyncContext,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Determine the repairs needed for every dataset in `scope`.
    ///
    /// A probe error on any repository skips the dataset for this pass.
    pub async fn plan_actions(&self, scope: &Scope, options: &PlanOptions) -> SyncResult<Plan> {
        let catalog = self.ctx.catalog.as_ref();
        let batch_size = match options.batch_size {
            0 => self.ctx.config.sync.batch_size,
            n => n,
        };
        let include = options.destinations.clone().unwrap_or_default();

        let datasets = load_datasets(catalog, &scope.to_filter(), batch_size).await?;
        let sessions = load_sessions(catalog, &datasets).await?;
        let records = load_records(catalog, &datasets, batch_size).await?;
        debug!(datasets = datasets.len(), sessions = sessions.len(), "planning reconciliation");

        let mut plan = Plan {
            datasets_examined: datasets.len(),
            ..Plan::default()
        };
        let mut by_session: HashMap<Uuid, SessionPlan> = HashMap::new();

        for dataset in &datasets {
            let Some(session) = sessions.get(&dataset.session_id) else {
                warn!(dataset_id = %dataset.id, session_id = %dataset.session_id, "dataset references an unknown session, skipping");
                plan.skipped.push(SkippedDataset {
                    dataset_id: dataset.id,
                    reason: format!("unknown session {}", dataset.session_id),
                });
                continue;
            };
            let path = match expected_path(session, dataset) {
                Ok(path) => path,
                Err(e) => {
                    warn!(dataset_id = %dataset.id, error = %e, "cannot derive canonical path, skipping");
                    plan.skipped.push(SkippedDataset {
                        dataset_id: dataset.id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let repos = self.ctx.registry.for_lab(&session.lab, &include);
            let states = match self.probe(dataset, &path, &repos, &records).await {
                Ok(states) => states,
                Err(skipped) => {
                    plan.skipped.push(skipped);
                    continue;
                }
            };

            let actions = classify(dataset.id, &path, &states, options.destinations.as_deref());
            for action in &actions {
                trace!(session_id = %session.id, %action, "planned");
            }

            let entry = by_session
                .entry(session.id)
                .or_insert_with(|| SessionPlan {
                    session: session.clone(),
                    last_modified: dataset.modified_at,
                    actions: Vec::new(),
                });
            entry.last_modified = entry.last_modified.max(dataset.modified_at);
            entry.actions.extend(actions);
        }

        let mut sessions: Vec<SessionPlan> = by_session
            .into_values()
            .filter(|s| !s.actions.is_empty())
            .collect();
        sessions.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.session.id.cmp(&b.session.id))
        });
        plan.sessions = sessions;

        info!(
            datasets = plan.datasets_examined,
            sessions = plan.sessions.len(),
            actions = plan.actions().count(),
            skipped = plan.skipped.len(),
            "reconciliation plan ready"
        );
        Ok(plan)
    }

    async fn probe<'r>(
        &self,
        dataset: &Dataset,
        path: &str,
        repos: &[&'r RegisteredRepository],
        records: &'r HashMap<(Uuid, String), Vec<FileRecord>>,
    ) -> Result<Vec<RepoState<'r>>, SkippedDataset> {
        let dataset_id = dataset.id;
        let mut states = Vec::with_capacity(repos.len());
        for &repo in repos {
            let size = probe_size(&repo.store, path).await.map_err(|e| {
                warn!(dataset_id = %dataset_id, repository = %repo.name(), error = %e, "probe failed, skipping dataset this pass");
                SkippedDataset {
                    dataset_id,
                    reason: format!("probe of {} failed: {e}", repo.name()),
                }
            })?;
            let repo_records = records
                .get(&(dataset_id, repo.name().to_string()))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let present = usable_copy(size, dataset.file_size, repo_records);
            if size.is_some() && !present {
                warn!(dataset_id = %dataset_id, repository = %repo.name(), size = ?size, expected = ?dataset.file_size, "copy differs from catalog, not trusted");
            }
            trace!(dataset_id = %dataset_id, repository = %repo.name(), size = ?size, present, "probed");
            states.push(RepoState {
                repository: &repo.repository,
                records: repo_records,
                present,
            });
        }
        Ok(states)
    }

    /// Apply the catalog-only actions among `actions`.
    ///
    /// Each action was justified by a probe made during planning. Records
    /// for a repository that a `Sync` action targets are left to the
    /// transfer driver, which creates them once the copy is confirmed.
    pub async fn apply(&self, actions: &[RepairAction], dry_run: bool) -> SyncResult<ApplySummary> {
        let catalog = self.ctx.catalog.as_ref();
        let mut summary = ApplySummary::default();
        let now = OffsetDateTime::now_utc();
        let transfer_targets: HashSet<(Uuid, &str)> = actions
            .iter()
            .filter_map(|a| match a {
                RepairAction::Sync {
                    dataset_id, dest, ..
                } => Some((*dataset_id, dest.as_str())),
                _ => None,
            })
            .collect();

        for action in actions {
            match action {
                RepairAction::CreateRecord {
                    dataset_id,
                    repository,
                    relative_path,
                    exists,
                } => {
                    if transfer_targets.contains(&(*dataset_id, repository.as_str())) {
                        debug!(dataset_id = %dataset_id, repository = %repository, "record deferred to transfer");
                        continue;
                    }
                    if dry_run {
                        info!(dataset_id = %dataset_id, repository = %repository, exists, "DRY-RUN: would create file record");
                        continue;
                    }
                    let (_, created) = catalog
                        .get_or_create_file_record(*dataset_id, repository, relative_path, *exists, now)
                        .await?;
                    if created {
                        summary.records_created += 1;
                        info!(dataset_id = %dataset_id, repository = %repository, exists, "created file record");
                    }
                }
                RepairAction::SetExistsTrue {
                    dataset_id,
                    record_id,
                    repository,
                } => {
                    if dry_run {
                        info!(dataset_id = %dataset_id, repository = %repository, "DRY-RUN: would set exists=true");
                        continue;
                    }
                    summary.flags_repaired += catalog
                        .set_file_record_exists(&[*record_id], true, now)
                        .await?;
                    info!(dataset_id = %dataset_id, repository = %repository, "set exists=true");
                }
                RepairAction::Sync { .. } | RepairAction::FlagConflict { .. } => {}
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alyx_core::RepositoryKind;
    use time::macros::datetime;

    fn repository(name: &str, kind: RepositoryKind, authoritative: bool) -> Repository {
        Repository {
            name: name.to_string(),
            kind,
            root: format!("/mnt/{name}"),
            hostname: None,
            is_personal: false,
            authoritative,
            labs: Vec::new(),
            credentials: None,
        }
    }

    fn record(dataset_id: Uuid, repository: &str, exists: bool) -> FileRecord {
        FileRecord {
            id: Uuid::new_v4(),
            dataset_id,
            repository: repository.to_string(),
            relative_path: "p".to_string(),
            exists,
            invalidated_at: None,
            modified_at: datetime!(2024-05-01 00:00 UTC),
        }
    }

    #[test]
    fn classifies_each_state() {
        let id = Uuid::new_v4();
        let flatiron = repository("flatiron", RepositoryKind::LocalMirror, true);
        let tape = repository("tape", RepositoryKind::TapeArchive, false);
        let aws = repository("aws", RepositoryKind::CloudBucket, false);

        let flatiron_records = vec![record(id, "flatiron", false)];
        let aws_records = vec![record(id, "aws", true)];
        let states = [
            RepoState {
                repository: &flatiron,
                records: &flatiron_records,
                present: true,
            },
            RepoState {
                repository: &tape,
                records: &[],
                present: false,
            },
            RepoState {
                repository: &aws,
                records: &aws_records,
                present: false,
            },
        ];

        let actions = classify(id, "p", &states, None);
        assert_eq!(
            actions,
            vec![
                RepairAction::SetExistsTrue {
                    dataset_id: id,
                    record_id: flatiron_records[0].id,
                    repository: "flatiron".into(),
                },
                RepairAction::CreateRecord {
                    dataset_id: id,
                    repository: "tape".into(),
                    relative_path: "p".into(),
                    exists: false,
                },
                RepairAction::Sync {
                    dataset_id: id,
                    source: "flatiron".into(),
                    dest: "tape".into(),
                },
                RepairAction::Sync {
                    dataset_id: id,
                    source: "flatiron".into(),
                    dest: "aws".into(),
                },
            ]
        );
    }

    #[test]
    fn up_to_date_dataset_needs_nothing() {
        let id = Uuid::new_v4();
        let flatiron = repository("flatiron", RepositoryKind::LocalMirror, true);
        let records = vec![record(id, "flatiron", true)];
        let states = [RepoState {
            repository: &flatiron,
            records: &records,
            present: true,
        }];
        assert!(classify(id, "p", &states, None).is_empty());
    }

    #[test]
    fn duplicate_records_flag_conflict_without_sync() {
        let id = Uuid::new_v4();
        let flatiron = repository("flatiron", RepositoryKind::LocalMirror, true);
        let aws = repository("aws", RepositoryKind::CloudBucket, false);
        let aws_records = vec![record(id, "aws", true), record(id, "aws", false)];
        let states = [
            RepoState {
                repository: &flatiron,
                records: &[],
                present: true,
            },
            RepoState {
                repository: &aws,
                records: &aws_records,
                present: false,
            },
        ];

        let actions = classify(id, "p", &states, Some(&["aws".to_string()]));
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            RepairAction::FlagConflict { record_ids, .. } if record_ids.len() == 2
        ));
    }

    #[test]
    fn lower_priority_copy_is_never_a_source() {
        let id = Uuid::new_v4();
        let flatiron = repository("flatiron", RepositoryKind::LocalMirror, true);
        let aws = repository("aws", RepositoryKind::CloudBucket, false);
        let states = [
            RepoState {
                repository: &flatiron,
                records: &[],
                present: false,
            },
            RepoState {
                repository: &aws,
                records: &[],
                present: true,
            },
        ];

        let actions = classify(id, "p", &states, Some(&["flatiron".to_string()]));
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], RepairAction::CreateRecord { exists: false, .. }));
    }

    #[test]
    fn copies_that_disagree_with_the_catalog_are_not_usable() {
        let id = Uuid::new_v4();
        let clean = vec![record(id, "aws", false)];
        let mut invalidated = clean.clone();
        invalidated[0].invalidated_at = Some(datetime!(2024-05-02 00:00 UTC));

        assert!(usable_copy(Some(8), None, &clean));
        assert!(usable_copy(Some(8), Some(8), &clean));
        assert!(usable_copy(Some(0), Some(0), &[]));
        assert!(!usable_copy(None, Some(8), &clean));
        assert!(!usable_copy(Some(7), Some(8), &clean));
        assert!(!usable_copy(Some(8), Some(8), &invalidated));
    }

    #[test]
    fn untrusted_copy_is_replaced_not_flagged_present() {
        let id = Uuid::new_v4();
        let flatiron = repository("flatiron", RepositoryKind::LocalMirror, true);
        let aws = repository("aws", RepositoryKind::CloudBucket, false);
        let flatiron_records = vec![record(id, "flatiron", true)];
        let mut aws_records = vec![record(id, "aws", false)];
        aws_records[0].invalidated_at = Some(datetime!(2024-05-02 00:00 UTC));
        let states = [
            RepoState {
                repository: &flatiron,
                records: &flatiron_records,
                present: true,
            },
            RepoState {
                repository: &aws,
                records: &aws_records,
                present: usable_copy(Some(8), Some(8), &aws_records),
            },
        ];

        let actions = classify(id, "p", &states, Some(&["aws".to_string()]));
        assert_eq!(
            actions,
            vec![RepairAction::Sync {
                dataset_id: id,
                source: "flatiron".into(),
                dest: "aws".into(),
            }]
        );
    }

    #[test]
    fn actions_serialize_with_a_tag() {
        let id = Uuid::nil();
        let action = RepairAction::Sync {
            dataset_id: id,
            source: "flatiron".into(),
            dest: "aws".into(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "sync");
        assert_eq!(json["dest"], "aws");
        assert_eq!(action.to_string(), format!("SYNC {id} flatiron -> aws"));
    }

    #[test]
    fn equal_priority_sources_resolve_by_name() {
        let a = repository("mirror_a", RepositoryKind::LocalMirror, true);
        let b = repository("mirror_b", RepositoryKind::LocalMirror, true);
        let aws = repository("aws", RepositoryKind::CloudBucket, false);
        let states = [
            RepoState {
                repository: &b,
                records: &[],
                present: true,
            },
            RepoState {
                repository: &a,
                records: &[],
                present: true,
            },
        ];
        assert_eq!(pick_source(&states, &aws).map(|r| r.name.as_str()), Some("mirror_a"));
    }
}
