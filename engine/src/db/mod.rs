/// Database module for SQLite persistence
///
/// Durable session memory. Uses a WAL-mode pool so readers taking snapshots
/// do not block the turn append of another session.
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub mod memory;

pub use memory::SqliteMemoryStore;

use crate::conductor::memory::MemoryLimits;

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database and run migrations
    ///
    /// SQLite replays any leftover WAL on open, so an unclean shutdown needs
    /// no extra recovery step.
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Migrations are idempotent and can be run multiple times safely
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        // ALTER TABLE is not idempotent; run it only on older schemas
        let kind_columns: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('memory_entries') WHERE name = 'kind'",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to inspect memory_entries schema")?;
        if kind_columns == 0 {
            sqlx::raw_sql(include_str!("../../migrations/002_entry_kind.sql"))
                .execute(&self.pool)
                .await
                .context("Failed to execute migration 002_entry_kind.sql")?;
        }

        info!("Database migrations completed successfully");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoint the WAL into the main database file
    pub async fn flush_wal(&self) -> Result<()> {
        info!("Flushing WAL to disk");

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        debug!("WAL flushed successfully");
        Ok(())
    }

    /// Flush the WAL and close all connections
    pub async fn close(self) -> Result<()> {
        info!("Closing database connection");
        self.flush_wal().await?;
        self.pool.close().await;
        info!("Database connection closed");
        Ok(())
    }

    /// Session memory backed by this database
    pub fn memory(&self, limits: MemoryLimits) -> SqliteMemoryStore {
        SqliteMemoryStore::new(self.pool.clone(), limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::memory::{EntryKind, MemoryStore};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("estate.db");

        let db = Database::new(&db_path).await.unwrap();
        assert!(db_path.exists());

        let result = sqlx::query("SELECT 1").fetch_one(db.pool()).await;
        assert!(result.is_ok());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("estate.db")).await.unwrap();

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();

        assert!(tables.contains(&"memory_entries".to_string()));
        assert!(tables.contains(&"session_plans".to_string()));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_wal_mode_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("estate.db")).await.unwrap();

        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_runs_migrations_again() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("estate.db");

        Database::new(&path).await.unwrap().close().await.unwrap();
        let db = Database::new(&path).await.unwrap();
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_schema_without_entry_kind_is_upgraded() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("estate.db");

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await.unwrap();
        sqlx::raw_sql(
            "CREATE TABLE memory_entries (
                session_id TEXT NOT NULL,
                turn_index INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                extracted_entities TEXT NOT NULL DEFAULT '{}',
                referenced_plan_id TEXT,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (session_id, turn_index)
            );
            INSERT INTO memory_entries VALUES
                ('s', 1, 'system', 'old turn', '{}', 'p1', '2026-01-01T00:00:00+00:00');",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        let db = Database::new(&path).await.unwrap();
        let store = db.memory(MemoryLimits::default());
        let entries = store.entries("s", None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Turn);
        db.close().await.unwrap();
    }
}
