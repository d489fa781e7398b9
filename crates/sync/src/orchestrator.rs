//! Sync orchestrator: plan, transfer per session, then advance the watermark.

use crate::context::SyncContext;
use crate::driver::{SyncOutcome, TransferDriver};
use crate::error::{SyncError, SyncResult};
use crate::reconcile::{ApplySummary, PlanOptions, ReconciliationEngine, RepairAction};
use crate::scope::{Scope, ScopeSelector};
use alyx_catalog::repos::{DatasetRepo, WatermarkRepo};
use alyx_core::{RepositoryKind, Watermark};
use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Which repositories a run pushes data to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DestinationSelector {
    /// Every repository of one kind.
    Kind(RepositoryKind),
    /// Named repositories.
    Names(Vec<String>),
    /// Every reachable repository.
    All,
}

impl DestinationSelector {
    /// Default watermark channel for the selection.
    pub fn channel(&self) -> String {
        match self {
            Self::Kind(kind) => format!("sync:{kind}"),
            Self::Names(names) => {
                let mut names = names.clone();
                names.sort();
                format!("sync:{}", names.join(","))
            }
            Self::All => "sync:all".to_string(),
        }
    }
}

/// One session whose transfer did not complete.
#[derive(Clone, Debug, Serialize)]
pub struct SessionFailure {
    pub session_id: Uuid,
    pub source: String,
    pub dest: String,
    pub status: i32,
    pub command: String,
}

/// Result of [`SyncOrchestrator::run`].
#[derive(Clone, Debug, Default, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    pub channel: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub scope_start: Option<OffsetDateTime>,
    pub datasets_examined: usize,
    pub sessions_planned: usize,
    pub sessions_succeeded: usize,
    pub failures: Vec<SessionFailure>,
    pub outcome: SyncOutcome,
    pub bookkeeping: ApplySummary,
    pub conflicts: usize,
    /// Sync actions left for a later run because another source won the session.
    pub deferred: usize,
    pub skipped_datasets: usize,
    /// Sessions beyond `--limit`, left for the next run.
    pub sessions_not_processed: usize,
    pub watermark: Option<WatermarkWindow>,
}

impl SyncReport {
    pub fn sessions_failed(&self) -> usize {
        self.failures.len()
    }
}

/// The window recorded at the end of a run.
#[derive(Clone, Debug, Serialize)]
pub struct WatermarkWindow {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

/// Drives a full incremental sync.
pub struct SyncOrchestrator<'a> {
    ctx: &'a SyncContext,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Watermark channel used for `destinations`, honouring the configured override.
    pub fn channel(&self, destinations: &DestinationSelector) -> String {
        self.ctx
            .config
            .sync
            .watermark_channel
            .clone()
            .unwrap_or_else(|| destinations.channel())
    }

    /// Reachable destination repository names for the selector.
    pub fn resolve_destinations(&self, selector: &DestinationSelector) -> SyncResult<Vec<String>> {
        let registry = &self.ctx.registry;
        let names: Vec<String> = match selector {
            DestinationSelector::Names(names) => {
                for name in names {
                    registry.get(name)?;
                }
                names
                    .iter()
                    .filter(|name| {
                        let reachable = registry.is_reachable(name);
                        if !reachable {
                            warn!(repository = %name, "destination not reachable from this host, skipping");
                        }
                        reachable
                    })
                    .cloned()
                    .collect()
            }
            DestinationSelector::Kind(kind) => registry
                .iter()
                .filter(|e| e.repository.kind == *kind && !e.repository.is_personal)
                .filter(|e| registry.is_reachable(e.name()))
                .map(|e| e.name().to_string())
                .collect(),
            DestinationSelector::All => registry
                .iter()
                .filter(|e| !e.repository.is_personal)
                .filter(|e| registry.is_reachable(e.name()))
                .map(|e| e.name().to_string())
                .collect(),
        };
        if names.is_empty() {
            return Err(SyncError::Config(format!(
                "no reachable destination repositories for {selector:?}"
            )));
        }
        Ok(names)
    }

    /// Reconcile the scope, transfer every session that needs it and, unless
    /// a fatal error occurs or `dry_run` is set, record the watermark.
    pub async fn run(
        &self,
        scope: &ScopeSelector,
        destinations: &DestinationSelector,
        dry_run: bool,
    ) -> SyncResult<SyncReport> {
        let run_start = OffsetDateTime::now_utc();
        let catalog = self.ctx.catalog.as_ref();
        let channel = self.channel(destinations);

        let dests = self.resolve_destinations(destinations)?;
        let resolved = scope.resolve(catalog, &channel, run_start).await?;
        info!(channel = %channel, destinations = ?dests, scope = ?resolved, dry_run, "starting sync run");

        let engine = ReconciliationEngine::new(self.ctx);
        let plan = engine
            .plan_actions(
                &resolved,
                &PlanOptions {
                    destinations: Some(dests),
                    batch_size: 0,
                },
            )
            .await?;

        let mut report = SyncReport {
            dry_run,
            channel: channel.clone(),
            scope_start: match resolved {
                Scope::ModifiedAfter(at) => Some(at),
                _ => None,
            },
            datasets_examined: plan.datasets_examined,
            sessions_planned: plan.sessions.len(),
            skipped_datasets: plan.skipped.len(),
            conflicts: plan
                .actions()
                .filter(|a| matches!(a, RepairAction::FlagConflict { .. }))
                .count(),
            ..SyncReport::default()
        };
        for action in plan.actions() {
            if let RepairAction::FlagConflict { dataset_id, repository, record_ids } = action {
                warn!(dataset_id = %dataset_id, repository = %repository, records = record_ids.len(), "conflicting file records need manual review");
            }
        }

        let limit = self.ctx.config.sync.limit.map(|l| l as usize);
        let driver = TransferDriver::new(self.ctx);

        for (index, session_plan) in plan.sessions.iter().enumerate() {
            if limit.is_some_and(|l| index >= l) {
                report.sessions_not_processed = plan.sessions.len() - index;
                info!(limit = ?limit, remaining = report.sessions_not_processed, "session limit reached");
                break;
            }
            let session = &session_plan.session;

            let applied = engine.apply(&session_plan.actions, dry_run).await?;
            report.bookkeeping.records_created += applied.records_created;
            report.bookkeeping.flags_repaired += applied.flags_repaired;

            let (transfers, deferred) = self.choose_transfers(&session_plan.actions)?;
            report.deferred += deferred.len();
            self.reschedule(&deferred, dry_run).await?;

            let mut session_ok = true;
            for (dest, source) in &transfers {
                match driver.sync_session(session, source, dest, dry_run).await {
                    Ok(outcome) => report.outcome.absorb(&outcome),
                    Err(SyncError::TransferFailed {
                        session_id,
                        status,
                        command,
                    }) => {
                        session_ok = false;
                        self.reschedule(&sync_targets(&session_plan.actions, dest), dry_run)
                            .await?;
                        report.failures.push(SessionFailure {
                            session_id,
                            source: source.clone(),
                            dest: dest.clone(),
                            status,
                            command,
                        });
                    }
                    Err(e) if e.is_fatal() => {
                        error!(session_id = %session.id, error = %e, "aborting run, watermark not advanced");
                        return Err(e);
                    }
                    Err(e) => {
                        session_ok = false;
                        self.reschedule(&sync_targets(&session_plan.actions, dest), dry_run)
                            .await?;
                        error!(session_id = %session.id, source = %source, dest = %dest, error = %e, "session sync failed");
                        report.failures.push(SessionFailure {
                            session_id: session.id,
                            source: source.clone(),
                            dest: dest.clone(),
                            status: -1,
                            command: e.to_string(),
                        });
                    }
                }
            }
            if session_ok {
                report.sessions_succeeded += 1;
            }
        }

        if report.sessions_not_processed > 0 {
            // Sessions past the limit still need the current scope next time.
            info!(channel = %channel, "session limit reached, watermark not advanced");
        } else if dry_run {
            info!(channel = %channel, "DRY-RUN: would append watermark");
        } else {
            let finished_at = OffsetDateTime::now_utc();
            let watermark = Watermark::new(channel.as_str(), run_start, finished_at)?;
            catalog.append_watermark(&watermark).await?;
            report.watermark = Some(WatermarkWindow {
                started_at: watermark.started_at,
                finished_at: watermark.finished_at,
            });
            info!(channel = %channel, started_at = %watermark.started_at, finished_at = %watermark.finished_at, "appended watermark");
        }

        info!(
            succeeded = report.sessions_succeeded,
            failed = report.sessions_failed(),
            added = report.outcome.added,
            errors = report.outcome.errors,
            deferred = report.deferred,
            "sync run complete"
        );
        Ok(report)
    }

    /// One source per destination for a session: the highest-priority source
    /// among the session's sync actions. Returns the (dest, source) pairs and
    /// the datasets deferred because they asked for another source.
    fn choose_transfers(
        &self,
        actions: &[RepairAction],
    ) -> SyncResult<(Vec<(String, String)>, Vec<Uuid>)> {
        let mut by_dest: BTreeMap<&str, Vec<(&str, Uuid)>> = BTreeMap::new();
        for action in actions {
            if let RepairAction::Sync {
                dataset_id,
                source,
                dest,
            } = action
            {
                by_dest
                    .entry(dest.as_str())
                    .or_default()
                    .push((source.as_str(), *dataset_id));
            }
        }

        let mut transfers = Vec::with_capacity(by_dest.len());
        let mut deferred = Vec::new();
        for (dest, wanted) in by_dest {
            let mut best = self.ctx.registry.get(wanted[0].0)?;
            for &(name, _) in &wanted[1..] {
                let candidate = self.ctx.registry.get(name)?;
                let order = candidate
                    .repository
                    .priority_cmp(&best.repository)
                    .then_with(|| best.name().cmp(candidate.name()));
                if order.is_gt() {
                    best = candidate;
                }
            }
            deferred.extend(
                wanted
                    .iter()
                    .filter(|(source, _)| *source != best.name())
                    .map(|(_, id)| *id),
            );
            transfers.push((dest.to_string(), best.name().to_string()));
        }
        Ok((transfers, deferred))
    }

    /// Bump `modified_at` so the next incremental run selects the datasets again.
    async fn reschedule(&self, dataset_ids: &[Uuid], dry_run: bool) -> SyncResult<()> {
        if dataset_ids.is_empty() {
            return Ok(());
        }
        if dry_run {
            info!(datasets = dataset_ids.len(), "DRY-RUN: would reschedule datasets for the next run");
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();
        for id in dataset_ids {
            self.ctx.catalog.touch_dataset(*id, now).await?;
        }
        info!(datasets = dataset_ids.len(), "rescheduled datasets for the next run");
        Ok(())
    }
}

/// Datasets a session's sync actions want copied to `dest`.
fn sync_targets(actions: &[RepairAction], dest: &str) -> Vec<Uuid> {
    actions
        .iter()
        .filter_map(|a| match a {
            RepairAction::Sync {
                dataset_id,
                dest: d,
                ..
            } if d == dest => Some(*dataset_id),
            _ => None,
        })
        .collect()
}
