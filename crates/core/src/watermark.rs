//! Append-only log entries recording windows covered by incremental syncs.

use time::{Duration, OffsetDateTime};

/// Look-back used when a channel has no watermark yet.
pub const DEFAULT_LOOKBACK: Duration = Duration::weeks(2);

/// One completed sync window on a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Watermark {
    /// One channel per source/destination pairing, e.g. `flatiron->aws`.
    pub channel: String,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
}

impl Watermark {
    /// Build an entry, rejecting windows that end before they start.
    pub fn new(
        channel: impl Into<String>,
        started_at: OffsetDateTime,
        finished_at: OffsetDateTime,
    ) -> crate::Result<Self> {
        let channel = channel.into();
        if channel.is_empty() {
            return Err(crate::Error::InvalidWatermark(
                "channel must not be empty".to_string(),
            ));
        }
        if finished_at < started_at {
            return Err(crate::Error::InvalidWatermark(format!(
                "end {finished_at} precedes start {started_at}"
            )));
        }
        Ok(Self {
            channel,
            started_at: crate::catalog_timestamp(started_at),
            finished_at: crate::catalog_timestamp(finished_at),
        })
    }

    /// Check that this entry may be appended after `previous`.
    pub fn follows(&self, previous: &Watermark) -> crate::Result<()> {
        if self.started_at < previous.finished_at {
            return Err(crate::Error::InvalidWatermark(format!(
                "start {} overlaps previous window ending {}",
                self.started_at, previous.finished_at
            )));
        }
        Ok(())
    }

    /// Lower bound of the next incremental scope.
    ///
    /// Changes made while the previous run was in flight must be looked at
    /// again, so the bound is the previous start rather than its end.
    pub fn next_scope_start(last: Option<&Watermark>, now: OffsetDateTime) -> OffsetDateTime {
        match last {
            Some(last) => last.started_at,
            None => crate::catalog_timestamp(now - DEFAULT_LOOKBACK),
        }
    }
}
