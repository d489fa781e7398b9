//! Synchronization of Alyx datasets across repositories.
//!
//! - [`ReconciliationEngine`] compares catalog bookkeeping with storage probes
//!   and plans repairs per session
//! - [`TransferDriver`] mirrors one session directory and records the result
//! - [`SyncOrchestrator`] runs incremental syncs and advances the watermark
//! - [`Auditor`] verifies sizes and hashes and repairs stale flags and paths

pub mod auditor;
pub mod context;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod reconcile;
pub mod registry;
pub mod scope;

pub use auditor::{Auditor, Finding, FindingKind, Severity, UnregisteredFile};
pub use context::SyncContext;
pub use driver::{SyncOutcome, TransferDriver};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{DestinationSelector, SessionFailure, SyncOrchestrator, SyncReport};
pub use reconcile::{
    ApplySummary, Plan, PlanOptions, ReconciliationEngine, RepairAction, SessionPlan,
    SkippedDataset, expected_path,
};
pub use registry::{RegisteredRepository, RepositoryRegistry};
pub use scope::{Scope, ScopeSelector};
