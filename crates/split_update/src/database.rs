//! Database access used by the engine.
//!
//! The engine only needs a handful of primitives: the table definition, a
//! `MIN`/`MAX` scan, one statement per transaction, and pool sizing. They sit
//! behind the [`Database`] trait so the engine can run against MySQL via
//! `sqlx` or against a scripted double in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::{Connection, Row};
use tracing::{debug, trace};

use crate::config::ConnectionConfig;
use crate::statement::quote_identifier;

/// How long a unit may wait for a pooled connection before failing.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
/// Transactional SQL primitives consumed by the split-update engine.
pub trait Database: Send + Sync {
    /// Returns the `Create Table` text of `table`.
    async fn show_create_table(&self, table: &str) -> Result<String>;

    /// Returns `(MIN(column), MAX(column))`, or `None` when the table has no
    /// non-NULL values in `column`. Wide enough for `BIGINT UNSIGNED`.
    async fn min_max(&self, table: &str, column: &str) -> Result<Option<(i128, i128)>>;

    /// Runs `sql` inside its own transaction and returns the affected rows.
    ///
    /// Commits on success; rolls back and returns the error on failure.
    async fn execute_in_transaction(&self, sql: &str) -> Result<u64>;

    /// Caps open and idle connections at `size` with no lifetime eviction.
    async fn resize_pool(&self, size: usize) -> Result<()>;

    /// Returns `true` when a round-trip to the server succeeds.
    async fn ping(&self) -> bool;

    /// Closes every pooled connection.
    async fn close(&self);
}

/// MySQL-backed [`Database`] over an `sqlx` pool.
pub struct MySqlDatabase {
    options: MySqlConnectOptions,
    pool: RwLock<MySqlPool>,
    closed: AtomicBool,
}

impl MySqlDatabase {
    /// Creates a lazily connected pool; no connection is opened until the
    /// first statement runs.
    pub fn connect_lazy(config: &ConnectionConfig) -> Self {
        let mut options = MySqlConnectOptions::new()
            .username(&config.user)
            .charset(&config.charset);
        options = match &config.socket {
            Some(socket) => options.socket(socket),
            None => options.host(&config.host).port(config.port),
        };
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        if !config.database.is_empty() {
            options = options.database(&config.database);
        }
        let pool = build_pool(&options, 1);
        Self {
            options,
            pool: RwLock::new(pool),
            closed: AtomicBool::new(false),
        }
    }

    fn pool(&self) -> MySqlPool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn build_pool(options: &MySqlConnectOptions, size: usize) -> MySqlPool {
    let size = u32::try_from(size.max(1)).unwrap_or(u32::MAX);
    MySqlPoolOptions::new()
        .max_connections(size)
        .min_connections(0)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_lazy_with(options.clone())
}

#[async_trait]
impl Database for MySqlDatabase {
    async fn show_create_table(&self, table: &str) -> Result<String> {
        let query = format!("SHOW CREATE TABLE {table}");
        trace!(sql = %query, "exec");
        let row = sqlx::query(&query)
            .fetch_one(&self.pool())
            .await
            .with_context(|| format!("show create table {table}"))?;
        // Older servers report the definition as a binary string.
        match row.try_get::<String, _>(1) {
            Ok(ddl) => Ok(ddl),
            Err(_) => {
                let raw = row
                    .try_get::<Vec<u8>, _>(1)
                    .with_context(|| format!("decode definition of {table}"))?;
                Ok(String::from_utf8_lossy(&raw).into_owned())
            }
        }
    }

    async fn min_max(&self, table: &str, column: &str) -> Result<Option<(i128, i128)>> {
        let column = quote_identifier(column);
        // Text keeps unsigned values above i64::MAX intact.
        let query = format!(
            "SELECT CAST(MIN({column}) AS CHAR), CAST(MAX({column}) AS CHAR) FROM {table}"
        );
        trace!(sql = %query, "exec");
        let (min, max): (Option<String>, Option<String>) = sqlx::query_as(&query)
            .fetch_one(&self.pool())
            .await
            .with_context(|| format!("scan bounds of {table}.{column}"))?;
        let (Some(min), Some(max)) = (min, max) else {
            return Ok(None);
        };
        let parse = |raw: &str| {
            raw.trim()
                .parse::<i128>()
                .with_context(|| format!("non-integer bound {raw:?} in {table}.{column}"))
        };
        Ok(Some((parse(&min)?, parse(&max)?)))
    }

    async fn execute_in_transaction(&self, sql: &str) -> Result<u64> {
        let pool = self.pool();
        let mut tx = pool.begin().await.context("begin transaction")?;
        match sqlx::query(sql).execute(&mut *tx).await {
            Ok(done) => {
                tx.commit().await.context("commit transaction")?;
                Ok(done.rows_affected())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    debug!(error = %rollback_err, "rollback after failed statement also failed");
                }
                Err(anyhow::Error::new(err).context("execute statement"))
            }
        }
    }

    async fn resize_pool(&self, size: usize) -> Result<()> {
        let fresh = build_pool(&self.options, size);
        let previous = {
            let mut guard = self.pool.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, fresh)
        };
        debug!(size, "resized connection pool");
        previous.close().await;
        Ok(())
    }

    async fn ping(&self) -> bool {
        let pool = self.pool();
        match pool.acquire().await {
            Ok(mut conn) => conn.ping().await.is_ok(),
            Err(_) => false,
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool().close().await;
    }
}
