//! Time value types: closed-open ranges and the injectable clock.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when constructing an empty or inverted range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid time range: start {start} must be before end {end}")]
pub struct TimeRangeError {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A closed-open interval of instants, `[start, end)`.
///
/// The start instant belongs to the range, the end instant does not, so two
/// back-to-back slots `[09:00, 10:00)` and `[10:00, 11:00)` never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawTimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = TimeRangeError;

    fn try_from(raw: RawTimeRange) -> Result<Self, Self::Error> {
        TimeRange::new(raw.start, raw.end)
    }
}

impl TimeRange {
    /// Creates a range, rejecting empty or inverted intervals.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TimeRangeError> {
        if start >= end {
            return Err(TimeRangeError { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates a range starting at `start` and lasting `duration`.
    pub fn starting_at(start: DateTime<Utc>, duration: Duration) -> Result<Self, TimeRangeError> {
        Self::new(start, start + duration)
    }

    /// Returns the inclusive start instant.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Returns the exclusive end instant.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns the length of the range.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Returns true if `instant` lies in `[start, end)`.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Returns true if the two ranges share at least one instant.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if the range has already started at `now`.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.start
    }

    /// Returns true if the range is over at `now`.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Source of the current instant.
///
/// Domain logic never reads the system clock directly; callers read `now`
/// once per operation from a clock and pass it down.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    /// Creates a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(now)),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}
