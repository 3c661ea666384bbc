//! Shared helpers for integration tests.
//!
//! [`ScriptedDatabase`] stands in for MySQL: it serves a fixed table
//! definition and key bounds, records every statement it is asked to run,
//! and fails chosen ranges a chosen number of times.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use split_update::{Database, Runner};

/// Database name used by every scripted runner.
pub const DATABASE: &str = "app";

/// `CREATE TABLE` text in the layout `SHOW CREATE TABLE` returns.
pub fn create_table(table: &str, body: &[&str]) -> String {
    let mut ddl = format!("CREATE TABLE `{table}` (\n");
    let lines = body
        .iter()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>();
    ddl.push_str(&lines.join(",\n"));
    ddl.push_str("\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4");
    ddl
}

/// `users` keyed by an auto-increment primary key.
pub fn users_ddl() -> String {
    create_table(
        "users",
        &[
            "`id` bigint(20) unsigned NOT NULL AUTO_INCREMENT",
            "`email` varchar(255) NOT NULL",
            "`status` tinyint(4) NOT NULL DEFAULT '0'",
            "PRIMARY KEY (`id`)",
        ],
    )
}

/// `events` with a non-key `seq` auto-increment column and an integer
/// primary key `event_id`.
pub fn events_ddl() -> String {
    create_table(
        "events",
        &[
            "`seq` int(11) NOT NULL AUTO_INCREMENT",
            "`event_id` bigint(20) NOT NULL",
            "`payload` text",
            "PRIMARY KEY (`event_id`)",
            "KEY `seq` (`seq`)",
        ],
    )
}

/// `audit_log` with no key and no auto-increment column.
pub fn audit_log_ddl() -> String {
    create_table(
        "audit_log",
        &[
            "`message` text",
            "`created_at` datetime NOT NULL",
        ],
    )
}

#[derive(Default)]
struct Script {
    executed: Vec<String>,
    /// Remaining failures keyed by range start; `None` key means unsplit.
    failures: HashMap<Option<i64>, u32>,
    applied: HashSet<Option<i64>>,
    catalog_calls: usize,
    pool_sizes: Vec<usize>,
    closes: usize,
}

/// In-memory [`Database`] driven by a script.
pub struct ScriptedDatabase {
    tables: HashMap<String, String>,
    bounds: Option<(i64, i64)>,
    /// Reported by `MIN`/`MAX` instead of `bounds` when set.
    catalog_bounds: Option<(i128, i128)>,
    /// Rows reported by a statement with no key range.
    unsplit_rows: u64,
    delay: Duration,
    script: Mutex<Script>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedDatabase {
    pub fn new(bounds: Option<(i64, i64)>) -> Self {
        Self {
            tables: HashMap::new(),
            bounds,
            catalog_bounds: None,
            unsplit_rows: 0,
            delay: Duration::ZERO,
            script: Mutex::new(Script::default()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_table(mut self, table: &str, ddl: String) -> Self {
        self.tables.insert(table.to_string(), ddl);
        self
    }

    /// Makes every statement take `delay` so concurrency can overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reports `(min, max)` from `MIN`/`MAX` verbatim, even when it does not
    /// fit an `i64` or is inverted.
    pub fn with_catalog_bounds(mut self, min: i128, max: i128) -> Self {
        self.catalog_bounds = Some((min, max));
        self
    }

    pub fn with_unsplit_rows(mut self, rows: u64) -> Self {
        self.unsplit_rows = rows;
        self
    }

    /// Fails the range starting at `start` on its next `times` attempts.
    pub fn fail_range(self, start: i64, times: u32) -> Self {
        self.lock().failures.insert(Some(start), times);
        self
    }

    /// Fails the unsplit statement on its next `times` attempts.
    pub fn fail_unsplit(self, times: u32) -> Self {
        self.lock().failures.insert(None, times);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn catalog_calls(&self) -> usize {
        self.lock().catalog_calls
    }

    pub fn pool_sizes(&self) -> Vec<usize> {
        self.lock().pool_sizes.clone()
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("script lock")
    }

    /// Rows inside `[start, end]` that exist between the table bounds.
    fn rows_in(&self, start: i64, end: i64) -> u64 {
        let Some((min, max)) = self.bounds else {
            return 0;
        };
        let low = start.max(min) as i128;
        let high = end.min(max) as i128;
        if high < low {
            0
        } else {
            (high - low + 1) as u64
        }
    }

    fn apply(&self, sql: &str) -> Result<u64> {
        let range = between(sql);
        let mut script = self.lock();
        script.executed.push(sql.to_string());
        let key = range.map(|(start, _)| start);
        if let Some(remaining) = script.failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("Deadlock found when trying to get lock; try restarting transaction");
            }
        }
        // A rerun of an applied statement changes nothing.
        if !script.applied.insert(key) {
            return Ok(0);
        }
        Ok(match range {
            Some((start, end)) => self.rows_in(start, end),
            None => self.unsplit_rows,
        })
    }
}

/// Extracts `(start, end)` from the trailing `BETWEEN start AND end`.
pub fn between(sql: &str) -> Option<(i64, i64)> {
    let (_, tail) = sql.rsplit_once(" BETWEEN ")?;
    let (start, end) = tail.split_once(" AND ")?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

#[async_trait]
impl Database for ScriptedDatabase {
    async fn show_create_table(&self, table: &str) -> Result<String> {
        self.lock().catalog_calls += 1;
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| anyhow!("Table '{DATABASE}.{table}' doesn't exist"))
    }

    async fn min_max(&self, _table: &str, _column: &str) -> Result<Option<(i128, i128)>> {
        self.lock().catalog_calls += 1;
        Ok(self
            .catalog_bounds
            .or_else(|| self.bounds.map(|(min, max)| (min.into(), max.into()))))
    }

    async fn execute_in_transaction(&self, sql: &str) -> Result<u64> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = self.apply(sql);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn resize_pool(&self, size: usize) -> Result<()> {
        self.lock().pool_sizes.push(size);
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.lock().closes += 1;
    }
}

/// Builds a runner over `db` bound to [`DATABASE`].
pub fn runner(db: &Arc<ScriptedDatabase>, split_range: i64) -> Runner {
    let mut runner = Runner::new(db.clone(), DATABASE);
    runner
        .set_split_range(split_range)
        .expect("positive split range");
    runner
}
