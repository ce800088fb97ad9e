//! Time helpers for scheduling.
//!
//! [`TimeWindow`] is the half-open `[start, end)` range used when searching
//! for common free time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window, or `None` when `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Creates a window from a start time and a non-negative length.
    pub fn from_duration(start: DateTime<Utc>, duration: Duration) -> Option<Self> {
        Self::new(start, start + duration)
    }

    /// Length of the window. Zero for inverted windows.
    pub fn duration(&self) -> Duration {
        (self.end - self.start).max(Duration::zero())
    }

    /// Returns true if the window has no length.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Returns true if `at` falls inside the window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Whole minutes from `now` until `target`, rounded up.
///
/// Returns 0 once `target` has been reached.
pub fn minutes_until_ceil(now: DateTime<Utc>, target: DateTime<Utc>) -> i64 {
    let seconds = (target - now).num_seconds();
    if seconds <= 0 { 0 } else { (seconds + 59) / 60 }
}
