//! SQLite store.
//!
//! One embedded database file holds all daemon state. Bootstrap is
//! idempotent: the schema script only creates what is missing, a light
//! column migration upgrades pre-`mode` databases, and the default tool
//! descriptors are upserted. Connections enforce foreign keys and queue on
//! a 5 second busy timeout so concurrent writers serialize instead of
//! erroring.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::pool::PoolConnection;
use sqlx::Transaction;
use thiserror::Error;

use foreman_kernel::EngineError;

mod schema;
pub mod queries;

pub use schema::SCHEMA_SQL;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("query error: {0}")]
    Query(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Decode(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for EngineError {
    fn from(error: StorageError) -> Self {
        EngineError::Storage(error.to_string())
    }
}

/// Handle to the embedded database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl Store {
    /// Open (creating if needed) the database file at `db_path`. Parent
    /// directories are created on demand.
    pub async fn open(db_path: &Path) -> StorageResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Connection(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            db_path: db_path.to_path_buf(),
        })
    }

    /// In-memory store for tests. Capped at one connection, since every SQLite
    /// `:memory:` connection is a distinct database.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Idempotent schema bootstrap: create missing objects, apply the light
    /// column migration, seed the default tool registry.
    pub async fn bootstrap(&self) -> StorageResult<()> {
        sqlx::raw_sql(schema::SCHEMA_SQL).execute(&self.pool).await?;

        for (column, alter) in schema::SESSION_MIGRATION_COLUMNS.iter().copied() {
            let present: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM pragma_table_info('sessions') WHERE name = ?",
            )
            .bind(column)
            .fetch_one(&self.pool)
            .await?;
            if present == 0 {
                tracing::info!(column, "migrating sessions table");
                sqlx::raw_sql(alter).execute(&self.pool).await?;
            }
        }

        let mut conn = self.acquire().await?;
        queries::ensure_default_tools(&mut conn).await?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn acquire(&self) -> StorageResult<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    pub async fn begin(&self) -> StorageResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn commit(&self, tx: Transaction<'static, Sqlite>) -> StorageResult<()> {
        Ok(tx.commit().await?)
    }
}
