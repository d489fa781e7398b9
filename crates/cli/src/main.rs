//! Command-line interface for Alyx dataset synchronization.

mod output;

use alyx_catalog::DatasetFilter;
use alyx_catalog::repos::{DatasetRepo, SessionRepo, WatermarkRepo};
use alyx_core::RepositoryKind;
use alyx_core::config::AppConfig;
use alyx_sync::{
    Auditor, DestinationSelector, PlanOptions, ReconciliationEngine, Scope, ScopeSelector,
    SyncContext, SyncOrchestrator,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "alyxsync")]
#[command(about = "Reconcile and synchronize Alyx datasets across repositories")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Path to configuration file
    #[arg(short, long, env = "ALYXSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Identity of this machine, selects which local mirrors can be probed.
    /// Mirrors bound to a host are skipped when this is unset.
    #[arg(long, env = "ALYXSYNC_HOSTNAME", global = true)]
    hostname: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
}

/// Which datasets to look at. Defaults to everything changed since the last run.
#[derive(Args, Clone, Default)]
#[group(multiple = false)]
struct ScopeArgs {
    /// Datasets modified in the last N hours
    #[arg(long)]
    hours: Option<u32>,

    /// Datasets modified since this date (YYYY-MM-DD, UTC)
    #[arg(long, value_parser = parse_date)]
    from_date: Option<Date>,

    /// Explicit session ids
    #[arg(long = "session", value_name = "UUID", num_args = 1..)]
    sessions: Vec<Uuid>,

    /// Explicit dataset ids
    #[arg(long = "dataset", value_name = "UUID", num_args = 1..)]
    datasets: Vec<Uuid>,
}

impl ScopeArgs {
    fn selector(&self) -> ScopeSelector {
        if let Some(hours) = self.hours {
            ScopeSelector::Hours(hours)
        } else if let Some(date) = self.from_date {
            ScopeSelector::FromDate(date)
        } else if !self.sessions.is_empty() {
            ScopeSelector::Sessions(self.sessions.clone())
        } else if !self.datasets.is_empty() {
            ScopeSelector::Datasets(self.datasets.clone())
        } else {
            ScopeSelector::SinceWatermark
        }
    }
}

#[derive(Args, Clone, Default)]
struct BatchArgs {
    /// Datasets fetched from the catalog per query
    #[arg(long)]
    batch_size: Option<u32>,
}

#[derive(Args, Clone, Default)]
struct DestinationArgs {
    /// Sync to every repository of this kind (local-mirror, tape-archive, cloud-bucket)
    #[arg(long, value_parser = parse_kind, conflicts_with = "destination")]
    destination_kind: Option<RepositoryKind>,

    /// Sync to these repositories
    #[arg(long, value_delimiter = ',')]
    destination: Vec<String>,
}

impl DestinationArgs {
    fn selector(&self) -> DestinationSelector {
        match (self.destination_kind, self.destination.is_empty()) {
            (Some(kind), _) => DestinationSelector::Kind(kind),
            (None, false) => DestinationSelector::Names(self.destination.clone()),
            (None, true) => DestinationSelector::All,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Copy missing files to destination repositories and update file records
    Sync {
        #[command(flatten)]
        scope: ScopeArgs,
        #[command(flatten)]
        destinations: DestinationArgs,
        #[command(flatten)]
        batch: BatchArgs,
        /// Maximum number of sessions to process
        #[arg(long)]
        limit: Option<u32>,
        /// Report planned changes without touching files or records
        #[arg(long, default_value_t = false)]
        dryrun: bool,
    },
    /// Show the repairs a sync would make, without changing anything
    Plan {
        #[command(flatten)]
        scope: ScopeArgs,
        #[command(flatten)]
        destinations: DestinationArgs,
        #[command(flatten)]
        batch: BatchArgs,
        /// Show at most this many sessions, oldest first
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Verify sizes and hashes, repair stale flags and paths, report conflicts
    Audit {
        #[command(flatten)]
        scope: ScopeArgs,
        #[command(flatten)]
        batch: BatchArgs,
        /// Maximum number of datasets to audit
        #[arg(long)]
        limit: Option<u32>,
        /// Report planned repairs without applying them
        #[arg(long, default_value_t = false)]
        dryrun: bool,
        /// Also list files on this repository that match no registered dataset
        #[arg(long, value_name = "REPOSITORY")]
        scan_files: Option<String>,
    },
    /// List recorded sync windows
    Watermarks {
        /// Channel name (defaults to the channel of a sync to every repository)
        channel: Option<String>,
    },
}

fn parse_date(s: &str) -> Result<Date, String> {
    Date::parse(s, format_description!("[year]-[month]-[day]"))
        .map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn parse_kind(s: &str) -> Result<RepositoryKind, String> {
    s.parse().map_err(|e: alyx_core::Error| e.to_string())
}

/// Layer the optional TOML file under `ALYXSYNC_` environment variables.
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("configuration file not found: {}", path.display());
        }
        tracing::debug!(config_path = %path.display(), "loading configuration from file");
        figment = figment.merge(Toml::file(path));
    }
    let config: AppConfig = figment
        .merge(Env::prefixed("ALYXSYNC_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = load_config(cli.global.config.as_deref())?;
    let json = cli.global.json;
    let hostname = cli.global.hostname.as_deref();

    match cli.command {
        Commands::Sync {
            scope,
            destinations,
            batch,
            limit,
            dryrun,
        } => {
            apply_batch(&mut config, &batch);
            if limit.is_some() {
                config.sync.limit = limit;
            }
            let ctx = context(config, hostname).await?;
            let report = SyncOrchestrator::new(&ctx)
                .run(&scope.selector(), &destinations.selector(), dryrun)
                .await
                .context("sync run aborted")?;
            output::print_report(&report, json)?;
            if !report.failures.is_empty() {
                anyhow::bail!("{} session(s) failed to sync", report.failures.len());
            }
        }
        Commands::Plan {
            scope,
            destinations,
            batch,
            limit,
        } => {
            apply_batch(&mut config, &batch);
            let ctx = context(config, hostname).await?;
            let orchestrator = SyncOrchestrator::new(&ctx);
            let selector = destinations.selector();
            let names = orchestrator.resolve_destinations(&selector)?;
            let resolved = scope
                .selector()
                .resolve(ctx.catalog.as_ref(), &orchestrator.channel(&selector), OffsetDateTime::now_utc())
                .await?;
            let mut plan = ReconciliationEngine::new(&ctx)
                .plan_actions(
                    &resolved,
                    &PlanOptions {
                        destinations: Some(names),
                        batch_size: 0,
                    },
                )
                .await
                .context("planning failed")?;
            if let Some(limit) = limit.map(|l| l as usize)
                && plan.sessions.len() > limit
            {
                tracing::info!(limit, omitted = plan.sessions.len() - limit, "session limit reached");
                plan.sessions.truncate(limit);
            }
            output::print_plan(&plan, json)?;
        }
        Commands::Audit {
            scope,
            batch,
            limit,
            dryrun,
            scan_files,
        } => {
            apply_batch(&mut config, &batch);
            let ctx = context(config, hostname).await?;
            // Without a selector the audit covers the whole catalog.
            let resolved = match scope.selector() {
                ScopeSelector::SinceWatermark => Scope::All,
                selector => {
                    selector
                        .resolve(ctx.catalog.as_ref(), "audit", OffsetDateTime::now_utc())
                        .await?
                }
            };
            let mut filter = resolved.to_filter();
            filter.limit = limit;
            let auditor = Auditor::new(&ctx);
            let findings = auditor.audit(&filter, dryrun).await.context("audit failed")?;
            output::print_findings(&findings, json)?;

            if let Some(repository) = scan_files {
                let mut unregistered = Vec::new();
                for session in audited_sessions(&ctx, &filter).await? {
                    unregistered.extend(auditor.scan_session_files(&session, &repository).await?);
                }
                output::print_unregistered(&unregistered, json)?;
            }
        }
        Commands::Watermarks { channel } => {
            let catalog = alyx_catalog::from_config(&config.catalog)
                .await
                .context("failed to open catalog")?;
            let channel = channel
                .or_else(|| config.sync.watermark_channel.clone())
                .unwrap_or_else(|| DestinationSelector::All.channel());
            let watermarks = catalog.list_watermarks(&channel).await?;
            output::print_watermarks(&channel, &watermarks, json)?;
        }
    }
    Ok(())
}

fn apply_batch(config: &mut AppConfig, batch: &BatchArgs) {
    if let Some(size) = batch.batch_size {
        config.sync.batch_size = size;
    }
}

async fn context(config: AppConfig, hostname: Option<&str>) -> Result<SyncContext> {
    SyncContext::from_config(config, hostname)
        .await
        .context("failed to initialize repositories and catalog")
}

/// Sessions owning the datasets matched by `filter`.
async fn audited_sessions(
    ctx: &SyncContext,
    filter: &DatasetFilter,
) -> Result<Vec<alyx_core::Session>> {
    let datasets = ctx.catalog.list_datasets(filter).await?;
    let mut ids: Vec<Uuid> = datasets.iter().map(|d| d.session_id).collect();
    ids.sort();
    ids.dedup();
    Ok(ctx.catalog.get_sessions(&ids).await?)
}
