//! Experimental session metadata used to derive canonical paths.

use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// A recording session owning a set of datasets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub lab: String,
    pub subject: String,
    pub start_date: Date,
    /// Session number within the day (rendered as three digits).
    pub number: u16,
    pub modified_at: OffsetDateTime,
}

impl Session {
    /// Relative directory of this session on every repository.
    pub fn relative_dir(&self) -> String {
        crate::path::session_relative_dir(&self.lab, &self.subject, self.start_date, self.number)
    }
}
