//! Sessions and their transaction units.
//!
//! A session is the plan derived from one statement: identity fields are
//! fixed at construction, while per-unit state and the result tally are the
//! only things that change while it runs. Retrying never mutates a session;
//! it builds a narrower one holding fresh copies of the failed units.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::column::SplitColumn;
use crate::partition::KeyRange;
use crate::result::SessionResult;
use crate::statement::ranged_statement;

/// Lifecycle of a single transaction unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending = 0,
    Succeeded = 1,
    Failed = 2,
}

impl UnitState {
    /// Reconstructs the state from its atomic byte.
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Succeeded,
            2 => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// One range, one statement, one database transaction.
#[derive(Debug)]
pub struct TransactionUnit {
    id: u64,
    range: KeyRange,
    state: AtomicU8,
}

impl TransactionUnit {
    /// Creates a pending unit.
    pub fn new(id: u64, range: KeyRange) -> Self {
        Self {
            id,
            range,
            state: AtomicU8::new(UnitState::Pending as u8),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn range(&self) -> KeyRange {
        self.range
    }

    pub fn state(&self) -> UnitState {
        UnitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `true` once the unit has been attempted.
    pub fn completed(&self) -> bool {
        self.state() != UnitState::Pending
    }

    /// `true` when the last attempt failed.
    pub fn failed(&self) -> bool {
        self.state() == UnitState::Failed
    }

    /// Moves a pending unit to its final state; returns `false` if an outcome
    /// was already recorded for this attempt.
    fn finish(&self, outcome: UnitState) -> bool {
        self.state
            .compare_exchange(
                UnitState::Pending as u8,
                outcome as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Returns a pending copy of this unit for a retry session.
    fn fresh_copy(&self) -> Self {
        Self::new(self.id, self.range)
    }
}

/// Turns planned ranges into pending units numbered from 1 in plan order.
pub fn number_units(ranges: Vec<KeyRange>) -> Vec<TransactionUnit> {
    ranges
        .into_iter()
        .enumerate()
        .map(|(idx, range)| TransactionUnit::new(idx as u64 + 1, range))
        .collect()
}

/// Outcome of one attempt at a unit (or at an unsplit statement).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Committed { rows_affected: u64 },
    Failed,
}

/// Coarse session status derived from the unit tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Planned, nothing attempted yet.
    Created,
    /// Some units attempted, some still pending.
    Running,
    /// Every unit committed.
    AllSucceeded,
    /// Every unit attempted and at least one failed.
    PartialFailure,
}

/// Plan and live tally for one split (or unsplit) update.
#[derive(Debug)]
pub struct Session {
    query: String,
    database: String,
    table: String,
    split: Option<SplitColumn>,
    split_range: i64,
    units: Vec<TransactionUnit>,
    result: RwLock<SessionResult>,
}

impl Session {
    /// Creates a split session executing `units` in the order given.
    pub fn split(
        query: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
        split: SplitColumn,
        split_range: i64,
        units: Vec<TransactionUnit>,
    ) -> Self {
        Self::from_units(query, database, table, Some(split), split_range, units)
    }

    /// Creates the single-unit session used by the unsplit fallback path.
    pub fn unsplit(query: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            database: database.into(),
            table: String::new(),
            split: None,
            split_range: 0,
            units: Vec::new(),
            result: RwLock::new(SessionResult::new(1)),
        }
    }

    fn from_units(
        query: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
        split: Option<SplitColumn>,
        split_range: i64,
        units: Vec<TransactionUnit>,
    ) -> Self {
        let planned = units.len() as u64;
        Self {
            query: query.into(),
            database: database.into(),
            table: table.into(),
            split,
            split_range,
            units,
            result: RwLock::new(SessionResult::new(planned)),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `<database>.<table>`, or just the database for unsplit sessions.
    pub fn qualified_table(&self) -> String {
        if self.table.is_empty() {
            self.database.clone()
        } else {
            format!("{}.{}", self.database, self.table)
        }
    }

    pub fn split_column(&self) -> Option<&SplitColumn> {
        self.split.as_ref()
    }

    pub fn split_range(&self) -> i64 {
        self.split_range
    }

    pub fn units(&self) -> &[TransactionUnit] {
        &self.units
    }

    /// Statement executed for the unit at `index`, bounded to its range.
    pub fn unit_statement(&self, index: usize) -> Option<String> {
        let unit = self.units.get(index)?;
        let column = self.split.as_ref()?;
        let range = unit.range();
        Some(ranged_statement(
            &self.query,
            &column.name,
            range.start,
            range.end,
        ))
    }

    /// Returns a copy of the current tally.
    pub fn result(&self) -> SessionResult {
        *self.result.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the outcome of the unit at `index`.
    ///
    /// The unit transition and the tally update happen under the session's
    /// write lock. Returns `false` (and changes nothing) when the unit already
    /// has an outcome.
    pub fn record_unit_outcome(&self, index: usize, outcome: UnitOutcome) -> bool {
        let Some(unit) = self.units.get(index) else {
            return false;
        };
        let mut result = self.result.write().unwrap_or_else(PoisonError::into_inner);
        let state = match outcome {
            UnitOutcome::Committed { .. } => UnitState::Succeeded,
            UnitOutcome::Failed => UnitState::Failed,
        };
        if !unit.finish(state) {
            return false;
        }
        apply_outcome(&mut result, outcome);
        true
    }

    /// Records the outcome of an unsplit statement.
    pub fn record_unsplit_outcome(&self, outcome: UnitOutcome) {
        let mut result = self.result.write().unwrap_or_else(PoisonError::into_inner);
        apply_outcome(&mut result, outcome);
    }

    /// Builds the retry session holding fresh copies of every unit that was
    /// attempted and failed; `None` when nothing failed.
    pub fn retry_session(&self) -> Option<Session> {
        let units = self
            .units
            .iter()
            .filter(|unit| unit.completed() && unit.failed())
            .map(TransactionUnit::fresh_copy)
            .collect::<Vec<_>>();
        if units.is_empty() {
            return None;
        }
        Some(Self::from_units(
            self.query.clone(),
            self.database.clone(),
            self.table.clone(),
            self.split.clone(),
            self.split_range,
            units,
        ))
    }

    /// Derives the coarse status from the current tally.
    pub fn status(&self) -> SessionStatus {
        let result = self.result();
        if result.executed == 0 {
            SessionStatus::Created
        } else if !result.is_complete() {
            SessionStatus::Running
        } else if result.failed > 0 {
            SessionStatus::PartialFailure
        } else {
            SessionStatus::AllSucceeded
        }
    }
}

fn apply_outcome(result: &mut SessionResult, outcome: UnitOutcome) {
    match outcome {
        UnitOutcome::Committed { rows_affected } => result.record_success(rows_affected),
        UnitOutcome::Failed => result.record_failure(),
    }
}
