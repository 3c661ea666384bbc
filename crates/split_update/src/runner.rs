//! The runner: owns the database handle, plans sessions, and executes them
//! with bounded parallelism.
//!
//! Execution model:
//! - a `Semaphore` with `parallel` permits gates how many range transactions
//!   are in flight; a permit is taken before each unit task is spawned;
//! - every unit task records its own outcome on the session under the
//!   session's write lock;
//! - the caller is released only after every spawned task has been joined,
//!   so the failed subset is known before any retry decision is made.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Semaphore;
use tracing::{debug, info, trace, warn};

use crate::column::resolve_split_column;
use crate::config::{ConnectionConfig, RunOptions, DEFAULT_SPLIT_RANGE};
use crate::database::{Database, MySqlDatabase};
use crate::error::SplitError;
use crate::partition::{plan_ranges, planned_range_count, shuffle_in_place, MAX_PLANNED_RANGES};
use crate::result::SessionResult;
use crate::session::{number_units, Session, UnitOutcome};
use crate::statement::UpdateStatement;

/// Failure of one full pass over a session.
#[derive(Debug)]
pub struct PassFailure {
    /// Narrower session holding fresh copies of the failed units; `None`
    /// when the pass could not start at all.
    pub retry: Option<Arc<Session>>,
    pub error: SplitError,
}

/// Process-wide execution context bound to one database handle.
pub struct Runner {
    db: Arc<dyn Database>,
    database: String,
    split_range: i64,
    dry_run: bool,
    shuffle: bool,
    sessions: RwLock<Vec<Arc<Session>>>,
    closed: AtomicBool,
}

impl Runner {
    /// Creates a runner over an existing database handle.
    pub fn new(db: Arc<dyn Database>, database: impl Into<String>) -> Self {
        Self {
            db,
            database: database.into(),
            split_range: DEFAULT_SPLIT_RANGE,
            dry_run: false,
            shuffle: false,
            sessions: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a runner over a lazily connected MySQL pool.
    pub fn connect(config: &ConnectionConfig) -> Self {
        Self::new(
            Arc::new(MySqlDatabase::connect_lazy(config)),
            config.database.clone(),
        )
    }

    /// Applies the split width, shuffle and dry-run knobs.
    pub fn configure(&mut self, options: &RunOptions) -> Result<(), SplitError> {
        self.set_split_range(options.split_range)?;
        self.dry_run = options.dry_run;
        self.shuffle = options.shuffle;
        Ok(())
    }

    /// Sets the chunk width and returns the previous one.
    pub fn set_split_range(&mut self, value: i64) -> Result<i64, SplitError> {
        if value <= 0 {
            return Err(SplitError::InvalidSplitRange { value });
        }
        Ok(std::mem::replace(&mut self.split_range, value))
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.shuffle = shuffle;
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn split_range(&self) -> i64 {
        self.split_range
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Returns `true` when the server answers a ping.
    pub async fn connected(&self) -> bool {
        self.db.ping().await
    }

    /// Closes the connection pool. Later calls are no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(database = %self.database, "closing connection pool");
        self.db.close().await;
    }

    /// Every session run so far, in execution order.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of every session's tally, in execution order.
    pub fn session_results(&self) -> Vec<SessionResult> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|session| session.result())
            .collect()
    }

    pub(crate) fn push_session(&self, session: Arc<Session>) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session);
    }

    pub(crate) fn db(&self) -> &dyn Database {
        self.db.as_ref()
    }

    /// Plans a split session for `query`.
    ///
    /// The statement shape is validated before any database access; then the
    /// split column and its bounds are resolved and the ranges planned. A plan
    /// that would be empty or larger than [`MAX_PLANNED_RANGES`] is refused.
    pub async fn new_session(&self, query: &str) -> Result<Session, SplitError> {
        let statement = UpdateStatement::parse(query)?;
        let qualified = format!("{}.{}", self.database, statement.table);
        let column = resolve_split_column(self.db(), &self.database, &statement.table).await?;
        info!(
            table = %qualified,
            column = %column.name,
            min = column.min,
            max = column.max,
            "split column resolved"
        );

        let planned = planned_range_count(column.min, column.max, self.split_range);
        if planned > MAX_PLANNED_RANGES {
            return Err(SplitError::TooManyRanges {
                table: qualified,
                planned,
                limit: MAX_PLANNED_RANGES,
            });
        }
        let ranges = plan_ranges(column.min, column.max, self.split_range);
        if ranges.is_empty() {
            return Err(SplitError::InvalidKeyBounds {
                table: qualified,
                detail: format!(
                    "no ranges for [{}, {}] at width {}",
                    column.min, column.max, self.split_range
                ),
            });
        }
        let mut units = number_units(ranges);
        if self.shuffle {
            debug!(table = %qualified, "shuffling range execution order");
            shuffle_in_place(&mut units, &mut rand::thread_rng());
        }
        debug!(
            table = %qualified,
            planned = units.len(),
            split_range = self.split_range,
            "session planned"
        );
        Ok(Session::split(
            statement.query,
            self.database.clone(),
            statement.table,
            column,
            self.split_range,
            units,
        ))
    }

    /// Runs every pending unit of `session` with at most `parallel` in
    /// flight and waits for all of them.
    ///
    /// Returns the completed session when nothing failed. Otherwise returns
    /// the retry session for the failed units together with
    /// [`SplitError::TransactionsFailed`].
    pub async fn run_parallel(
        &self,
        session: Arc<Session>,
        parallel: usize,
    ) -> Result<Arc<Session>, PassFailure> {
        let parallel = parallel.max(1);
        self.push_session(session.clone());
        let table = session.qualified_table();

        if let Err(err) = self.db.resize_pool(parallel).await {
            return Err(PassFailure {
                retry: None,
                error: SplitError::Database(err.context("resize connection pool")),
            });
        }

        let planned = session.result().planned;
        info!(table = %table, planned, parallel, "session start");

        let gate = Arc::new(Semaphore::new(parallel));
        let mut tasks = Vec::with_capacity(session.units().len());
        for (index, unit) in session.units().iter().enumerate() {
            if unit.completed() {
                continue;
            }
            let permit = match gate.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    // The gate is never closed; account for the unit anyway.
                    session.record_unit_outcome(index, UnitOutcome::Failed);
                    continue;
                }
            };
            let db = self.db.clone();
            let session = session.clone();
            let dry_run = self.dry_run;
            tasks.push((
                index,
                tokio::spawn(async move {
                    let _permit = permit;
                    run_unit(db.as_ref(), &session, index, dry_run).await;
                }),
            ));
        }

        for (index, task) in tasks {
            if let Err(err) = task.await {
                warn!(table = %table, error = %err, "range task aborted");
                session.record_unit_outcome(index, UnitOutcome::Failed);
            }
        }

        let result = session.result();
        if result.failed > 0 {
            let retry = session.retry_session().map(Arc::new);
            return Err(PassFailure {
                retry,
                error: SplitError::TransactionsFailed {
                    table,
                    failed: result.failed,
                },
            });
        }

        info!(table = %table, rows_affected = result.rows_affected, "session rows updated");
        info!(
            table = %table,
            executed = result.executed,
            succeeded = result.succeeded,
            failed = result.failed,
            "session finished"
        );
        Ok(session)
    }
}

/// Executes one unit's statement and records its outcome.
async fn run_unit(db: &dyn Database, session: &Session, index: usize, dry_run: bool) {
    let Some(unit) = session.units().get(index) else {
        return;
    };
    let Some(sql) = session.unit_statement(index) else {
        session.record_unit_outcome(index, UnitOutcome::Failed);
        return;
    };
    let range = unit.range();
    trace!(unit = unit.id(), start = range.start, end = range.end, "range update start");

    let outcome = match execute_statement(db, &sql, dry_run).await {
        Ok(rows_affected) => UnitOutcome::Committed { rows_affected },
        Err(err) => {
            warn!(unit = unit.id(), error = %format!("{err:#}"), "range transaction failed");
            UnitOutcome::Failed
        }
    };
    session.record_unit_outcome(index, outcome);
    if let UnitOutcome::Committed { rows_affected } = outcome {
        info!(
            unit = unit.id(),
            rows_affected,
            total = session.result().rows_affected,
            "range transaction committed"
        );
    }
}

/// Sends `sql` as one transaction, or only traces it in dry-run mode.
pub(crate) async fn execute_statement(
    db: &dyn Database,
    sql: &str,
    dry_run: bool,
) -> anyhow::Result<u64> {
    trace!(sql, dry_run, "exec");
    if dry_run {
        return Ok(0);
    }
    db.execute_in_transaction(sql).await
}
