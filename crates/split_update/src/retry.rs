//! Bounded retry of failed ranges.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::SplitError;
use crate::runner::{PassFailure, Runner};
use crate::session::Session;

/// Successful end of a split run.
#[derive(Debug)]
pub struct RetryOutcome {
    /// The last session executed; every one of its units committed.
    pub session: Arc<Session>,
    /// Retry passes used after the first run.
    pub retries: u32,
}

impl Runner {
    /// Runs `session`, then re-runs only the failed ranges until none remain
    /// or `max_retries` passes have been made.
    ///
    /// Retries are immediate. On exhaustion the last pass's error is returned.
    pub async fn run_with_retries(
        &self,
        session: Arc<Session>,
        parallel: usize,
        max_retries: u32,
    ) -> Result<RetryOutcome, SplitError> {
        let mut current = session;
        let mut retries = 0u32;
        loop {
            match self.run_parallel(current, parallel).await {
                Ok(session) => return Ok(RetryOutcome { session, retries }),
                Err(PassFailure {
                    retry: Some(next),
                    error,
                }) if retries < max_retries => {
                    retries += 1;
                    info!(
                        attempt = retries,
                        max_retries,
                        planned = next.result().planned,
                        error = %error,
                        "retrying failed ranges"
                    );
                    current = next;
                }
                Err(PassFailure { error, .. }) => {
                    warn!(retries, error = %error, "giving up on failed ranges");
                    return Err(error);
                }
            }
        }
    }
}
