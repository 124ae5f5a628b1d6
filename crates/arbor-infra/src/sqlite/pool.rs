//! Connection pools backing the durable session state store.
//!
//! Every walker checkpoint (current node, action response, revisit reset) is a
//! single batch on the one writer connection, so two walkers sharing a file
//! never interleave half-written checkpoints. Rehydration and `arbor state`
//! only read, and go through a read-only pool that WAL lets run alongside an
//! in-flight checkpoint.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Read connections; enough for a handful of concurrent sessions rehydrating.
const READ_CONNECTIONS: u32 = 8;

/// How long a checkpoint waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The checkpoint writer and the rehydration readers of one state database.
#[derive(Clone)]
pub struct StatePool {
    /// Read-only connections for key lookups and prefix scans.
    pub reader: SqlitePool,
    /// The single connection every checkpoint batch commits through.
    pub writer: SqlitePool,
}

impl StatePool {
    /// Connect to `database_url`, creating the file and applying migrations.
    ///
    /// The schema is migrated through the writer before any reader connects,
    /// so a reader never sees a database without `session_state`.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READ_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(database_url, "state database opened");
        Ok(Self { reader, writer })
    }

    /// Connect to the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        Self::connect(&database_url(path)).await
    }
}

/// Data directory from `ARBOR_DATA_DIR`, falling back to `~/.arbor`.
pub fn data_dir() -> PathBuf {
    match std::env::var_os("ARBOR_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".arbor"),
    }
}

/// SQLite URL for a state file, created on first use.
pub fn database_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

/// Default database URL inside [`data_dir`].
pub fn default_database_url() -> String {
    database_url(&data_dir().join("arbor.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scratch(name: &str) -> (tempfile::TempDir, StatePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = StatePool::open(&dir.path().join(name)).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_migrates_session_state_table() {
        let (_dir, pool) = scratch("state.db").await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(table_names, vec!["session_state"]);
    }

    #[tokio::test]
    async fn test_writer_uses_wal() {
        let (_dir, pool) = scratch("wal.db").await;

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_reader_refuses_writes() {
        let (_dir, pool) = scratch("readonly.db").await;

        let denied = sqlx::query("DELETE FROM session_state")
            .execute(&pool.reader)
            .await;
        assert!(denied.is_err());

        sqlx::query("DELETE FROM session_state")
            .execute(&pool.writer)
            .await
            .unwrap();
    }

    #[test]
    fn test_default_database_url() {
        let url = default_database_url();
        assert!(url.starts_with("sqlite://"));
        assert!(url.ends_with("arbor.db?mode=rwc"));
    }
}
