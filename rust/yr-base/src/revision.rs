//! Monotonic revision counter for the metadata store (spec §4.1 "Revision
//! semantics") and a small wall-clock helper used for lease expiry and
//! heartbeat timers.

use std::time::{SystemTime, UNIX_EPOCH};

/// A single global revision counter, advanced on every mutating metadata
/// store operation. Near `i64::MAX` it wraps back to zero with a warning,
/// which callers observe as a discontinuity rather than an error (§4.1).
#[derive(Debug, Default)]
pub struct MonotonicRevision {
    current: i64,
}

impl MonotonicRevision {
    pub fn new() -> Self {
        Self { current: 0 }
    }

    /// Starts the counter at `revision`, used on backup-replay recovery
    /// (spec §4.1: "advancing the revision to the max observed modRevision").
    pub fn starting_at(revision: i64) -> Self {
        Self { current: revision }
    }

    pub fn current(&self) -> i64 {
        self.current
    }

    /// Advance and return the new revision.
    pub fn advance(&mut self) -> i64 {
        if self.current >= i64::MAX {
            tracing::warn!(
                previous = self.current,
                "metadata store revision counter wrapped to 0"
            );
            self.current = 0;
        } else {
            self.current += 1;
        }
        self.current
    }
}

/// Current wall-clock time in whole milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// Current wall-clock time in whole microseconds since the Unix epoch, used
/// for lease id minting.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_micros() as u64
}
