//! Progress percentage shared by every delivery adapter.
//!
//! `progress = min(100, round(100 * events_seen / expected_count))`, capped at 99
//! while the query is still running. Only a terminal notification reports 100.

use crate::event::Position;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest percentage a running query may report.
pub const RUNNING_CAP: u8 = 99;

/// Percentage in `0..=100`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Progress(u8);

impl Progress {
    /// Nothing seen yet.
    pub const ZERO: Self = Self(0);

    /// Terminal value.
    pub const COMPLETE: Self = Self(100);

    /// Progress of a running query after `events_seen` of `expected` events.
    ///
    /// Rounds half up and never exceeds [`RUNNING_CAP`]. An `expected` of zero
    /// reports 0.
    ///
    /// ```
    /// use querycast_core::progress::Progress;
    ///
    /// assert_eq!(Progress::running(1, 3).value(), 33);
    /// assert_eq!(Progress::running(2, 3).value(), 67);
    /// assert_eq!(Progress::running(3, 3).value(), 99);
    /// assert_eq!(Progress::running(40, 3).value(), 99);
    /// ```
    #[must_use]
    pub fn running(events_seen: u64, expected: u64) -> Self {
        if expected == 0 {
            return Self::ZERO;
        }
        let seen = u128::from(events_seen.min(expected));
        let expected = u128::from(expected);
        let rounded = (200 * seen + expected) / (2 * expected);
        let capped = rounded.min(u128::from(RUNNING_CAP));
        Self(u8::try_from(capped).unwrap_or(RUNNING_CAP))
    }

    /// Raw percentage.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Whether this is the terminal value.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        self.0 >= 100
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Per-session progress bookkeeping.
///
/// Tracks how many events a client has seen and guarantees the reported
/// percentage never goes backwards within one session.
#[derive(Clone, Debug)]
pub struct ProgressTracker {
    expected: u64,
    seen: u64,
    reported: Progress,
}

impl ProgressTracker {
    /// Fresh session for a query expecting `expected` results.
    #[must_use]
    pub const fn new(expected: u64) -> Self {
        Self::resume(expected, 0)
    }

    /// Session resuming after `seen` events (cursor clients).
    #[must_use]
    pub const fn resume(expected: u64, seen: u64) -> Self {
        Self {
            expected,
            seen,
            reported: Progress::ZERO,
        }
    }

    /// Record one delivered event and return the progress to report with it.
    ///
    /// With a known log position the seen count becomes `position + 1` (never
    /// lower than before); without one it grows by one.
    pub fn observe(&mut self, position: Option<Position>) -> Progress {
        self.seen = match position {
            Some(position) => self.seen.max(position.events_through()),
            None => self.seen + 1,
        };
        self.current()
    }

    /// Progress for the current seen count, never lower than what was reported.
    pub fn current(&mut self) -> Progress {
        let progress = Progress::running(self.seen, self.expected).max(self.reported);
        self.reported = progress;
        progress
    }

    /// Report the terminal value.
    pub fn finish(&mut self) -> Progress {
        self.reported = Progress::COMPLETE;
        Progress::COMPLETE
    }

    /// Events seen so far.
    #[must_use]
    pub const fn seen(&self) -> u64 {
        self.seen
    }

    /// Expected result count of the query.
    #[must_use]
    pub const fn expected(&self) -> u64 {
        self.expected
    }
}
