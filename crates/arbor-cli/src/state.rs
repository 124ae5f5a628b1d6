//! Application state wiring the engine to its SQLite backend.
//!
//! AppState holds the data directory, the loaded `arbor.toml`, and the state
//! store every command shares.

use std::path::PathBuf;

use anyhow::Context;
use arbor_core::state::BoxStateStore;
use arbor_infra::config::load_engine_config;
use arbor_infra::sqlite::pool::{StatePool, data_dir, default_database_url};
use arbor_infra::sqlite::state::SqliteStateStore;
use arbor_types::config::EngineConfig;

/// Shared application state for CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
    pub backend: BoxStateStore,
}

impl AppState {
    /// Initialize the application state: load config, connect to the DB.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;

        let db_url = config
            .database_url
            .clone()
            .unwrap_or_else(default_database_url);
        let db_pool = StatePool::connect(&db_url)
            .await
            .with_context(|| format!("failed to open state database {db_url}"))?;

        tracing::debug!(data_dir = %data_dir.display(), "application state initialized");

        Ok(Self {
            data_dir,
            config,
            backend: BoxStateStore::new(SqliteStateStore::new(db_pool)),
        })
    }
}
