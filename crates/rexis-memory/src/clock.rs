//! Time grounding
//!
//! Agents resolve relative dates ("yesterday", "last week") against the server's
//! notion of now. Stores take a [`Clock`] so timestamps are deterministic in tests.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replay
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Current time in the two forms agents use for grounding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CurrentDateTime {
    /// ISO 8601 with a `Z` suffix and second precision, e.g. `2025-08-14T23:59:59Z`
    pub iso_utc: String,

    /// Unix timestamp in seconds
    pub unix_ts: i64,
}

impl CurrentDateTime {
    /// Ground `now` into both representations
    pub fn from_datetime(now: DateTime<Utc>) -> Self {
        Self {
            iso_utc: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            unix_ts: now.timestamp(),
        }
    }
}

/// Read the clock and ground it
pub fn current_datetime(clock: &dyn Clock) -> CurrentDateTime {
    CurrentDateTime::from_datetime(clock.now())
}

/// Parse an ISO 8601 timestamp, accepting a `Z` suffix or a numeric offset
///
/// A bare date-time without offset is read as UTC.
pub fn parse_iso8601(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("Invalid ISO 8601 datetime format '{}': {}", value, e))
}
