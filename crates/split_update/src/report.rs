//! Final tally and the optional JSON run report.

use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::RunOptions;
use crate::result::SessionResult;

/// Aggregate over every session of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTally {
    /// Sum of every session's tally.
    pub total: SessionResult,
    /// Units planned by the first session.
    pub first_planned: u64,
    /// Failures left by the last session; earlier failures were retried.
    pub finally_failed: u64,
}

impl RunTally {
    pub fn from_results(results: &[SessionResult]) -> Self {
        let mut tally = Self::default();
        for (index, result) in results.iter().enumerate() {
            tally.total.append(*result);
            if index == 0 {
                tally.first_planned = result.planned;
            }
            tally.finally_failed = result.failed;
        }
        tally
    }

    /// The line printed at the end of every run.
    pub fn summary_line(&self) -> String {
        format!(
            "RESULT: {} queries affected and {} rows updated. {} queries failed.",
            self.total.succeeded, self.total.rows_affected, self.finally_failed
        )
    }

    /// Session-level breakdown logged at debug verbosity.
    pub fn sessions_line(&self) -> String {
        format!(
            "SESSIONS: Planned {} queries and {} executed - {} succeeded / {} failed",
            self.first_planned, self.total.executed, self.total.succeeded, self.total.failed
        )
    }
}

/// Invocation metadata recorded alongside the results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMeta {
    pub database: String,
    pub query: String,
    pub parallel: usize,
    pub max_retries: u32,
    pub split_range: i64,
    pub shuffle: bool,
    pub dry_run: bool,
    pub fallback: bool,
    /// RFC 3339 start time.
    pub started_at: String,
    /// Human-readable wall time, e.g. `1m 3s 250ms`.
    pub elapsed: String,
}

impl ReportMeta {
    pub fn new(
        database: &str,
        query: &str,
        options: &RunOptions,
        started_at: SystemTime,
        elapsed: Duration,
    ) -> Self {
        // Sub-millisecond precision is noise in a report.
        let elapsed = Duration::from_millis(elapsed.as_millis() as u64);
        Self {
            database: database.to_string(),
            query: query.to_string(),
            parallel: options.parallel,
            max_retries: options.max_retries,
            split_range: options.split_range,
            shuffle: options.shuffle,
            dry_run: options.dry_run,
            fallback: options.fallback,
            started_at: humantime::format_rfc3339_seconds(started_at).to_string(),
            elapsed: humantime::format_duration(elapsed).to_string(),
        }
    }
}

/// Everything written by `--report`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub meta: ReportMeta,
    /// `split` or `fallback`; absent when the run failed before executing.
    pub mode: Option<String>,
    pub retries: u32,
    pub sessions: Vec<SessionResult>,
    pub tally: RunTally,
    pub exit_code: u8,
    pub error: Option<String>,
}

/// Writes `report` as pretty-printed JSON, creating parent directories.
pub fn write_report(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
    }
    let data = serde_json::to_vec_pretty(report).context("serialize run report")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(planned: u64, succeeded: u64, failed: u64, rows: u64) -> SessionResult {
        SessionResult {
            planned,
            executed: succeeded + failed,
            succeeded,
            failed,
            rows_affected: rows,
        }
    }

    #[test]
    fn finally_failed_comes_from_the_last_session() {
        let results = [tally(3, 2, 1, 200), tally(1, 1, 0, 100)];
        let run = RunTally::from_results(&results);
        assert_eq!(run.first_planned, 3);
        assert_eq!(run.total.executed, 4);
        assert_eq!(run.total.failed, 1);
        assert_eq!(run.finally_failed, 0);
        assert_eq!(
            run.summary_line(),
            "RESULT: 3 queries affected and 300 rows updated. 0 queries failed."
        );
        assert_eq!(
            run.sessions_line(),
            "SESSIONS: Planned 3 queries and 4 executed - 3 succeeded / 1 failed"
        );
    }

    #[test]
    fn empty_run_reports_zeroes() {
        let run = RunTally::from_results(&[]);
        assert_eq!(
            run.summary_line(),
            "RESULT: 0 queries affected and 0 rows updated. 0 queries failed."
        );
    }

    #[test]
    fn report_is_written_as_json_under_new_directories() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("reports").join("run.json");
        let results = vec![tally(2, 2, 0, 7)];
        let report = RunReport {
            meta: ReportMeta::new(
                "app",
                "UPDATE t SET x = 1",
                &RunOptions::default(),
                SystemTime::UNIX_EPOCH,
                Duration::from_millis(1_250),
            ),
            mode: Some("split".to_string()),
            retries: 0,
            tally: RunTally::from_results(&results),
            sessions: results,
            exit_code: 0,
            error: None,
        };
        write_report(&path, &report).expect("write report");

        let text = std::fs::read_to_string(&path).expect("read report");
        let decoded: RunReport = serde_json::from_str(&text).expect("decode report");
        assert_eq!(decoded, report);
        assert_eq!(decoded.meta.started_at, "1970-01-01T00:00:00Z");
        assert_eq!(decoded.meta.elapsed, "1s 250ms");
    }
}
