//! Split-update engine for MySQL.
//!
//! Runs one large `UPDATE` as many small transactions so no single commit
//! exceeds the write-set limit of synchronous-replication clusters such as
//! Galera or Percona XtraDB Cluster:
//! - the target table's definition is inspected for an integer split column
//!   (primary key, then single-column unique key, then auto-increment),
//! - `[MIN, MAX]` of that column is cut into fixed-width key ranges,
//! - each range runs as its own transaction with bounded parallelism,
//! - failed ranges are retried a bounded number of times, and a statement
//!   that cannot be split may be run unsplit when explicitly requested.
//!
//! The [`Runner`] is the entry point; the `split-update` binary wraps it.

pub mod column;
pub mod config;
pub mod database;
pub mod error;
mod fallback;
pub mod partition;
pub mod progress;
pub mod report;
pub mod result;
mod retry;
mod runner;
pub mod session;
pub mod statement;

pub use column::{SplitColumn, SplitColumnKind, TableDefinition};
pub use config::{ConnectionConfig, RunOptions, Verbosity};
pub use database::{Database, MySqlDatabase};
pub use error::SplitError;
pub use fallback::{UpdateMode, UpdateOutcome};
pub use partition::{plan_ranges, KeyRange};
pub use result::SessionResult;
pub use retry::RetryOutcome;
pub use runner::{PassFailure, Runner};
pub use session::{Session, SessionStatus, TransactionUnit, UnitOutcome, UnitState};
pub use statement::UpdateStatement;
