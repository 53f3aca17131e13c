use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::error::{CoverageError, Result};

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub const MAX_LOOK_AHEAD_DAYS: i64 = 3650;

pub fn to_isotime(moment: DateTime<Utc>) -> String {
    moment.format(ISO_FORMAT).to_string()
}

/// Parses an RFC 3339 timestamp and normalizes it to UTC.
pub fn parse_isotime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|moment| moment.with_timezone(&Utc))
        .map_err(|err| CoverageError::mapping(format!("invalid timestamp {value:?}: {err}")))
}

/// The `[since, until)` look-ahead window of a report run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl ReportWindow {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { since, until }
    }

    /// Window of `days` whole days starting at `now`, truncated to the second.
    pub fn look_ahead(now: DateTime<Utc>, days: i64) -> Result<Self> {
        if !(1..=MAX_LOOK_AHEAD_DAYS).contains(&days) {
            return Err(CoverageError::Config(format!(
                "look-ahead must be between 1 and {MAX_LOOK_AHEAD_DAYS} days, got {days}"
            )));
        }

        let since = now.duration_trunc(Duration::seconds(1)).unwrap_or(now);
        let until = Duration::try_days(days)
            .and_then(|offset| since.checked_add_signed(offset))
            .ok_or_else(|| {
                CoverageError::Config(format!("look-ahead of {days} days overflows the calendar"))
            })?;
        Ok(Self::new(since, until))
    }

    pub fn since_iso(&self) -> String {
        to_isotime(self.since)
    }

    pub fn until_iso(&self) -> String {
        to_isotime(self.until)
    }
}
