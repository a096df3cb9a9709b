//! Monotonic poll clock.
//!
//! Each source owns a [`PollClock`]. Every poll cycle takes one timestamp from
//! it and stamps all records of the cycle with it, so record timestamps never
//! go backwards for a given source even if the wall clock is stepped back
//! (NTP correction on a small home server is common).

use chrono::{DateTime, Utc};

/// Per-source clock producing non-decreasing timestamps.
#[derive(Debug, Clone, Default)]
pub struct PollClock {
    last: Option<DateTime<Utc>>,
}

impl PollClock {
    /// Create a clock that has not produced any timestamp yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp for a new poll cycle, taken from the wall clock.
    pub fn tick(&mut self) -> DateTime<Utc> {
        self.observe(Utc::now())
    }

    /// Timestamp for a new poll cycle given the current wall-clock reading.
    ///
    /// Returns `now` unless it is older than the last returned timestamp, in
    /// which case the last timestamp is repeated.
    pub fn observe(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let stamp = match self.last {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last = Some(stamp);
        stamp
    }

    /// Last timestamp returned, without advancing the clock.
    #[must_use]
    pub fn current(&self) -> Option<DateTime<Utc>> {
        self.last
    }
}
