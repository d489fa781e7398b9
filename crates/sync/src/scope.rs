//! Selection of the datasets a run looks at.

use crate::error::{SyncError, SyncResult};
use alyx_catalog::repos::WatermarkRepo;
use alyx_catalog::{CatalogStore, DatasetFilter};
use alyx_core::Watermark;
use time::{Date, Duration, OffsetDateTime, Time};
use uuid::Uuid;

/// Resolved set of datasets to examine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    Datasets(Vec<Uuid>),
    Sessions(Vec<Uuid>),
    /// Datasets modified at or after the timestamp.
    ModifiedAfter(OffsetDateTime),
    All,
}

impl Scope {
    pub fn to_filter(&self) -> DatasetFilter {
        match self {
            Scope::Datasets(ids) => DatasetFilter::by_ids(ids.iter().copied()),
            Scope::Sessions(ids) => DatasetFilter::by_sessions(ids.iter().copied()),
            Scope::ModifiedAfter(at) => DatasetFilter::modified_after(*at),
            Scope::All => DatasetFilter::all(),
        }
    }
}

/// How the operator asked for the scope to be chosen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ScopeSelector {
    /// Datasets modified in the last N hours.
    Hours(u32),
    /// Datasets modified since midnight UTC of the date.
    FromDate(Date),
    Sessions(Vec<Uuid>),
    Datasets(Vec<Uuid>),
    /// Since the start of the last recorded run on the channel.
    #[default]
    SinceWatermark,
}

impl ScopeSelector {
    /// Resolve against the catalog at time `now`.
    pub async fn resolve(
        &self,
        catalog: &dyn CatalogStore,
        channel: &str,
        now: OffsetDateTime,
    ) -> SyncResult<Scope> {
        let scope = match self {
            ScopeSelector::Hours(0) => {
                return Err(SyncError::Config("--hours must be at least 1".to_string()));
            }
            ScopeSelector::Hours(hours) => {
                Scope::ModifiedAfter(now - Duration::hours(i64::from(*hours)))
            }
            ScopeSelector::FromDate(date) => {
                Scope::ModifiedAfter(date.with_time(Time::MIDNIGHT).assume_utc())
            }
            ScopeSelector::Sessions(ids) => Scope::Sessions(ids.clone()),
            ScopeSelector::Datasets(ids) => Scope::Datasets(ids.clone()),
            ScopeSelector::SinceWatermark => {
                let last = catalog.last_watermark(channel).await?;
                Scope::ModifiedAfter(Watermark::next_scope_start(last.as_ref(), now))
            }
        };
        Ok(scope)
    }
}
