//! SQLite storage for backtest runs
//!
//! The engine owns the run model; this crate only stores rows whose nested
//! data is already serialized to JSON text.

pub mod repository;
pub mod schema;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub use sqlx::sqlite::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Migration to schema v{version} failed: {source}")]
    Migration {
        version: i64,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Writers wait this long on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pooled connection to the run store
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file, creating parent directories as needed
    pub async fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::Connection(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let db = Self::open(options, 5).await?;
        info!(path = %path.display(), "Run store opened");
        Ok(db)
    }

    /// Private in-memory database; a single connection keeps every query on the same data
    pub async fn in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DbError::Connection(e.to_string()))?;
        Self::open(options, 1).await
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32) -> DbResult<Self> {
        let options = options
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn schema_version(&self) -> DbResult<i64> {
        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    /// Apply the schema in one transaction unless the database is already current
    async fn run_migrations(&self) -> DbResult<()> {
        let current = self.schema_version().await?;
        if current >= schema::SCHEMA_VERSION {
            debug!(version = current, "Schema up to date");
            return Ok(());
        }

        let failed = |source: sqlx::Error| DbError::Migration {
            version: schema::SCHEMA_VERSION,
            source,
        };

        let mut tx = self.pool.begin().await?;
        for statement in schema::MIGRATIONS {
            sqlx::query(*statement)
                .execute(&mut *tx)
                .await
                .map_err(failed)?;
        }
        let set_version = format!("PRAGMA user_version = {}", schema::SCHEMA_VERSION);
        sqlx::query(&set_version)
            .execute(&mut *tx)
            .await
            .map_err(failed)?;
        tx.commit().await?;

        info!(from = current, to = schema::SCHEMA_VERSION, "Schema migrated");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Owned pool handle for stores that outlive the `Database`
    pub fn pool_clone(&self) -> SqlitePool {
        self.pool.clone()
    }
}
