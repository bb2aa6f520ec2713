pub mod models;
pub mod schema;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

use crate::error::GovernanceError;

/// Timestamps are stored as fixed-width RFC 3339 millisecond strings so
/// that lexicographic column order equals chronological order.
pub fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Shared connection pool for the relational store.
///
/// The pool is bounded; publish flows hold a single connection for the
/// duration of their transaction.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Connection pool statistics, surfaced by the health endpoint.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
    pub is_closed: bool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, GovernanceError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| GovernanceError::unavailable(format!("bad database URL: {}", e)))?
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| GovernanceError::unavailable(format!("database connect failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// In-memory database for tests; migrations are applied eagerly.
    ///
    /// Every pooled connection to `sqlite::memory:` opens its own empty
    /// database, so the pool is pinned to one long-lived connection.
    pub async fn new_in_memory() -> Result<Self, GovernanceError> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| GovernanceError::unavailable(format!("database connect failed: {}", e)))?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> Result<(), GovernanceError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| GovernanceError::integrity(format!("migration failed: {}", e)))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction; every multi-step state change runs on one.
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, GovernanceError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn check_health(&self) -> Result<bool, GovernanceError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| true)
            .map_err(|e| GovernanceError::unavailable(format!("health check failed: {}", e)))
    }

    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            is_closed: self.pool.is_closed(),
        }
    }
}
