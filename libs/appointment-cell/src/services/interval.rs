// libs/appointment-cell/src/services/interval.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Half-open time span `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "Interval start must be before end");
        Self { start, end }
    }

    pub fn from_duration(start: DateTime<Utc>, duration_minutes: i64) -> Self {
        Self::new(start, start + Duration::minutes(duration_minutes))
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// The one overlap predicate used for every conflict decision.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Widen the start backwards, e.g. to catch rows that began before the
    /// window but may still run into it.
    pub fn extend_back(&self, minutes: i64) -> Self {
        Self::new(self.start - Duration::minutes(minutes), self.end)
    }
}
