//! Whole-statement execution, used when a statement cannot be split.
//!
//! Running an unsplit update on a write-set-limited cluster (Galera,
//! Percona XtraDB Cluster) can exceed the replication write-set limit; this
//! path exists for tables where splitting is impossible and the caller has
//! explicitly asked for it.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::RunOptions;
use crate::error::SplitError;
use crate::result::SessionResult;
use crate::runner::{execute_statement, Runner};
use crate::session::{Session, UnitOutcome};
use crate::statement::{is_update_statement, trim_statement};

/// How the statement ended up being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Range-split into one transaction per key range.
    Split,
    /// Executed unsplit as a single transaction.
    Fallback,
}

/// Final outcome of [`Runner::execute_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub mode: UpdateMode,
    /// Retry passes used by the split path; always 0 for the fallback.
    pub retries: u32,
    /// Tally of the last session run.
    pub final_result: SessionResult,
}

impl Runner {
    /// Executes `query` unsplit in one transaction.
    ///
    /// Only the `UPDATE ... SET ...` shape is checked; `LIMIT` clauses and
    /// multi-table targets are passed through to the server unchanged.
    pub async fn simple_update(&self, query: &str) -> Result<SessionResult, SplitError> {
        let query = trim_statement(query);
        if !is_update_statement(query) {
            return Err(SplitError::invalid_statement(
                "statement must start with 'UPDATE <table> SET ...'",
            ));
        }
        let session = Arc::new(Session::unsplit(query, self.database()));
        self.push_session(session.clone());

        info!(database = %self.database(), "running unsplit update");
        match execute_statement(self.db(), query, self.dry_run()).await {
            Ok(rows_affected) => {
                session.record_unsplit_outcome(UnitOutcome::Committed { rows_affected });
                info!(rows_affected, "unsplit update committed");
                Ok(session.result())
            }
            Err(err) => {
                session.record_unsplit_outcome(UnitOutcome::Failed);
                Err(SplitError::Database(err.context("unsplit update")))
            }
        }
    }

    /// Plans and runs `query` split by key range with bounded retries.
    ///
    /// When the statement cannot be split (bad shape or no usable column) and
    /// `options.fallback` is set, it is executed unsplit instead. Exhausted
    /// retries never trigger the fallback.
    pub async fn execute_update(
        &self,
        query: &str,
        options: &RunOptions,
    ) -> Result<UpdateOutcome, SplitError> {
        let session = match self.new_session(query).await {
            Ok(session) => session,
            Err(err) if options.fallback && err.allows_fallback() => {
                warn!(error = %err, "cannot split statement, falling back to a single transaction");
                let final_result = self.simple_update(query).await?;
                return Ok(UpdateOutcome {
                    mode: UpdateMode::Fallback,
                    retries: 0,
                    final_result,
                });
            }
            Err(err) => return Err(err),
        };

        let outcome = self
            .run_with_retries(Arc::new(session), options.parallel, options.max_retries)
            .await?;
        Ok(UpdateOutcome {
            mode: UpdateMode::Split,
            retries: outcome.retries,
            final_result: outcome.session.result(),
        })
    }
}
