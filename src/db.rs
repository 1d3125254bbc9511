//! Database connection and schema management.
//!
//! SQLite connectivity for the ingestion store:
//! - Connection pool management
//! - WAL mode for concurrent reads while the pipeline writes
//! - Automatic migration execution
//!
//! # Example
//!
//! ```no_run
//! use raito_ingest::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("raito.db")).await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::instrument;

/// Default maximum number of connections in the pool.
/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in milliseconds.
/// Connections wait this long before returning SQLITE_BUSY.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Database connection wrapper with connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at the given path, enables
    /// WAL mode and runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// The database exists only for the lifetime of the connection. WAL mode
    /// is not enabled as it provides no benefit in memory.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Gracefully closes all connections in the pool.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_new_in_memory_succeeds() {
        let db = Database::new_in_memory().await;
        assert!(db.is_ok(), "Failed to create in-memory database");
    }

    #[tokio::test]
    async fn test_database_migrations_create_tables() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO records (fingerprint, source_uri, fields) VALUES ('ab', 'http://x.test', '{}')",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_ok(), "Records table should exist after migration");

        let result = sqlx::query(
            "INSERT INTO assets (fingerprint, origin_uri, format, width, height, bytes) \
             VALUES ('cd', 'http://x.test/a.png', 'png', 1, 1, x'00')",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_ok(), "Assets table should exist after migration");
    }

    #[tokio::test]
    async fn test_database_fingerprint_uniqueness_enforced() {
        let db = Database::new_in_memory().await.unwrap();

        sqlx::query("INSERT INTO records (fingerprint, source_uri, fields) VALUES ('ab', 'a', '{}')")
            .execute(db.pool())
            .await
            .unwrap();
        let duplicate =
            sqlx::query("INSERT INTO records (fingerprint, source_uri, fields) VALUES ('ab', 'b', '{}')")
                .execute(db.pool())
                .await;

        assert!(
            duplicate.is_err(),
            "Duplicate record fingerprint should violate the unique index"
        );
    }

    #[tokio::test]
    async fn test_database_with_tempfile_enables_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).await.unwrap();
        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(mode.0.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_database_close_works() {
        let db = Database::new_in_memory().await.unwrap();
        db.close().await;
    }
}
