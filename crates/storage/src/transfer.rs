//! Bulk transfer primitive.
//!
//! A transfer mirrors one directory of a source repository into the same
//! directory of a destination repository. Command-line copiers are invoked
//! with an explicit argument vector, never through a shell.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectStore, StorageProbe};
use alyx_core::Credentials;
use alyx_core::config::{TransferConfig, TransferTool};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, error, info, instrument};

/// Exit status reported for partial transfers, matching rsync's code 23.
pub const PARTIAL_TRANSFER_STATUS: i32 = 23;

/// One side of a transfer: a directory below a repository root.
#[derive(Clone, Debug)]
pub struct TransferEndpoint {
    /// Repository name, used to look up in-process stores.
    pub repository: String,
    /// Root locator: an absolute path or an `s3://bucket/prefix` URI.
    pub root: String,
    /// Directory relative to the root, without leading or trailing `/`.
    pub prefix: String,
    /// Named credential profile for tools that take one.
    pub credentials: Option<Credentials>,
}

impl TransferEndpoint {
    pub fn new(repository: impl Into<String>, root: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            root: root.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Full location of the directory, without a trailing slash.
    pub fn uri(&self) -> String {
        let root = self.root.trim_end_matches('/');
        if self.prefix.is_empty() {
            root.to_string()
        } else {
            format!("{root}/{}", self.prefix)
        }
    }

    /// Key prefix used against an [`ObjectStore`], with a trailing slash.
    fn key_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }
}

/// Typed arguments for one transfer.
#[derive(Clone, Debug)]
pub struct TransferRequest {
    pub source: TransferEndpoint,
    pub dest: TransferEndpoint,
    /// Remove destination files absent from the source.
    pub delete_extraneous: bool,
    /// Report planned changes without touching the destination.
    pub dry_run: bool,
    pub quiet: bool,
}

/// Result of running a transfer to completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferOutput {
    pub exit_status: i32,
    pub log: String,
}

impl TransferOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Directory-level copier between two repositories.
///
/// A non-zero [`TransferOutput::exit_status`] means the transfer did not
/// complete. `Err` is reserved for failures to run the transfer at all.
#[async_trait]
pub trait BulkTransfer: Send + Sync {
    async fn transfer(&self, request: &TransferRequest) -> StorageResult<TransferOutput>;

    /// Short tool name for logs.
    fn tool_name(&self) -> &'static str;

    /// Human-readable rendition of the invocation, for error reports.
    fn describe(&self, request: &TransferRequest) -> String {
        format!(
            "{} {} -> {}",
            self.tool_name(),
            request.source.uri(),
            request.dest.uri()
        )
    }
}

// =============================================================================
// Command-line copiers
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CommandTool {
    Rsync,
    AwsCli,
}

/// Runs `rsync` or `aws s3 sync` as a child process.
#[derive(Clone, Debug)]
pub struct CommandTransfer {
    tool: CommandTool,
    program: String,
    extra_args: Vec<String>,
}

impl CommandTransfer {
    pub fn rsync(program: Option<String>, extra_args: Vec<String>) -> Self {
        Self {
            tool: CommandTool::Rsync,
            program: program.unwrap_or_else(|| "rsync".to_string()),
            extra_args,
        }
    }

    pub fn aws_cli(program: Option<String>, extra_args: Vec<String>) -> Self {
        Self {
            tool: CommandTool::AwsCli,
            program: program.unwrap_or_else(|| "aws".to_string()),
            extra_args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument vector for a request, excluding the program itself.
    pub fn args(&self, request: &TransferRequest) -> Vec<String> {
        let mut args = Vec::new();
        match self.tool {
            CommandTool::Rsync => {
                // --mkpath (rsync >= 3.2.3) creates missing subject/date parents.
                args.extend(["-a", "--mkpath"].map(String::from));
                if request.delete_extraneous {
                    args.push("--delete".to_string());
                }
                if request.dry_run {
                    args.push("--dry-run".to_string());
                }
                if request.quiet {
                    args.push("--quiet".to_string());
                }
                args.extend(self.extra_args.iter().cloned());
                // Trailing slashes copy directory contents rather than the directory.
                args.push(format!("{}/", request.source.uri()));
                args.push(format!("{}/", request.dest.uri()));
            }
            CommandTool::AwsCli => {
                args.extend(["s3", "sync"].map(String::from));
                args.push(request.source.uri());
                args.push(request.dest.uri());
                if request.delete_extraneous {
                    args.push("--delete".to_string());
                }
                if request.dry_run {
                    args.push("--dryrun".to_string());
                }
                if request.quiet {
                    args.push("--only-show-errors".to_string());
                }
                let profile = request
                    .dest
                    .credentials
                    .as_ref()
                    .or(request.source.credentials.as_ref());
                if let Some(profile) = profile {
                    args.push("--profile".to_string());
                    args.push(profile.expose().to_string());
                }
                args.extend(self.extra_args.iter().cloned());
            }
        }
        args
    }
}

#[async_trait]
impl BulkTransfer for CommandTransfer {
    #[instrument(skip(self, request), fields(tool = self.tool_name(), source = %request.source.uri(), dest = %request.dest.uri(), dry_run = request.dry_run))]
    async fn transfer(&self, request: &TransferRequest) -> StorageResult<TransferOutput> {
        let args = self.args(request);
        debug!(program = %self.program, ?args, "spawning transfer");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| StorageError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        // Killed by a signal: no exit code.
        let exit_status = output.status.code().unwrap_or(-1);
        if exit_status == 0 {
            info!("transfer completed");
        } else {
            error!(exit_status, command = %self.describe(request), "transfer failed");
        }

        Ok(TransferOutput { exit_status, log })
    }

    fn tool_name(&self) -> &'static str {
        match self.tool {
            CommandTool::Rsync => "rsync",
            CommandTool::AwsCli => "aws-cli",
        }
    }

    fn describe(&self, request: &TransferRequest) -> String {
        let mut line = self.program.clone();
        for arg in self.args(request) {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }
}

// =============================================================================
// In-process copier
// =============================================================================

/// Mirrors directories between configured object stores without a subprocess.
///
/// Files are compared by size; a destination file is rewritten when it is
/// missing or its size differs from the source.
pub struct NativeTransfer {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl NativeTransfer {
    pub fn new(stores: HashMap<String, Arc<dyn ObjectStore>>) -> Self {
        Self { stores }
    }

    fn store(&self, repository: &str) -> StorageResult<&Arc<dyn ObjectStore>> {
        self.stores.get(repository).ok_or_else(|| {
            StorageError::Config(format!("no object store configured for repository {repository}"))
        })
    }

    async fn needs_copy(
        source: &Arc<dyn ObjectStore>,
        dest: &Arc<dyn ObjectStore>,
        src_key: &str,
        dst_key: &str,
    ) -> StorageResult<bool> {
        match dest.size(dst_key).await {
            Ok(dst_size) => Ok(source.size(src_key).await? != dst_size),
            Err(StorageError::NotFound(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl BulkTransfer for NativeTransfer {
    #[instrument(skip(self, request), fields(tool = "native", source = %request.source.uri(), dest = %request.dest.uri(), dry_run = request.dry_run))]
    async fn transfer(&self, request: &TransferRequest) -> StorageResult<TransferOutput> {
        let source = self.store(&request.source.repository)?;
        let dest = self.store(&request.dest.repository)?;
        let src_prefix = request.source.key_prefix();
        let dst_prefix = request.dest.key_prefix();

        let src_keys = source.list(&src_prefix).await?;
        let mut log = String::new();

        // An empty source would otherwise wipe the destination under --delete.
        if src_keys.is_empty() {
            let _ = writeln!(log, "source directory {} is empty or missing", request.source.uri());
            error!(source = %request.source.uri(), "transfer source is empty or missing");
            return Ok(TransferOutput {
                exit_status: PARTIAL_TRANSFER_STATUS,
                log,
            });
        }

        let mut failed = 0usize;
        let mut expected = BTreeSet::new();

        for src_key in &src_keys {
            let relative = src_key.strip_prefix(&src_prefix).unwrap_or(src_key);
            let dst_key = format!("{dst_prefix}{relative}");
            expected.insert(dst_key.clone());

            match Self::needs_copy(source, dest, src_key, &dst_key).await {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    failed += 1;
                    let _ = writeln!(log, "error: {relative}: {e}");
                    continue;
                }
            }

            if !request.quiet {
                let _ = writeln!(log, "{relative}");
            }
            if request.dry_run {
                continue;
            }
            let copied = match source.get(src_key).await {
                Ok(data) => dest.put(&dst_key, data).await,
                Err(e) => Err(e),
            };
            if let Err(e) = copied {
                failed += 1;
                let _ = writeln!(log, "error: {relative}: {e}");
            }
        }

        if request.delete_extraneous {
            for dst_key in dest.list(&dst_prefix).await? {
                if expected.contains(&dst_key) {
                    continue;
                }
                let relative = dst_key.strip_prefix(&dst_prefix).unwrap_or(&dst_key);
                if !request.quiet {
                    let _ = writeln!(log, "deleting {relative}");
                }
                if request.dry_run {
                    continue;
                }
                if let Err(e) = dest.delete(&dst_key).await {
                    failed += 1;
                    let _ = writeln!(log, "error: deleting {relative}: {e}");
                }
            }
        }

        let exit_status = if failed == 0 { 0 } else { PARTIAL_TRANSFER_STATUS };
        if failed == 0 {
            info!(files = src_keys.len(), "transfer completed");
        } else {
            error!(failed, "transfer completed with errors");
        }
        Ok(TransferOutput { exit_status, log })
    }

    fn tool_name(&self) -> &'static str {
        "native"
    }
}

/// Build the configured transfer implementation.
///
/// `stores` is only consulted by the native copier.
pub fn transfer_from_config(
    config: &TransferConfig,
    stores: HashMap<String, Arc<dyn ObjectStore>>,
) -> Arc<dyn BulkTransfer> {
    match config.tool {
        TransferTool::Rsync => Arc::new(CommandTransfer::rsync(
            config.program.clone(),
            config.extra_args.clone(),
        )),
        TransferTool::AwsCli => Arc::new(CommandTransfer::aws_cli(
            config.program.clone(),
            config.extra_args.clone(),
        )),
        TransferTool::Native => Arc::new(NativeTransfer::new(stores)),
    }
}
