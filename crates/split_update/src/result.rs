//! Execution tallies for one session and their cross-session sum.

use serde::{Deserialize, Serialize};

/// Point-in-time tally of a session's transaction units.
///
/// Always handed out by value; the live copy stays behind the session lock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    /// Units planned for this session.
    pub planned: u64,
    /// Units whose statement has been attempted.
    pub executed: u64,
    /// Units that committed.
    pub succeeded: u64,
    /// Units that failed and were rolled back.
    pub failed: u64,
    /// Rows reported as changed by committed units.
    pub rows_affected: u64,
}

impl SessionResult {
    /// Creates an empty tally expecting `planned` units.
    pub fn new(planned: u64) -> Self {
        Self {
            planned,
            ..Self::default()
        }
    }

    /// Records one successful unit.
    pub fn record_success(&mut self, rows_affected: u64) {
        self.executed += 1;
        self.succeeded += 1;
        self.rows_affected += rows_affected;
    }

    /// Records one failed unit.
    pub fn record_failure(&mut self) {
        self.executed += 1;
        self.failed += 1;
    }

    /// Adds every counter of `other` into `self`.
    pub fn append(&mut self, other: SessionResult) {
        self.planned += other.planned;
        self.executed += other.executed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.rows_affected += other.rows_affected;
    }

    /// Returns `true` once every planned unit has been attempted.
    pub fn is_complete(&self) -> bool {
        self.executed >= self.planned
    }

    /// Percentage of planned units attempted so far.
    pub fn percent_complete(&self) -> f64 {
        if self.planned == 0 {
            return 100.0;
        }
        (self.executed as f64 / self.planned as f64 * 100.0).min(100.0)
    }
}
