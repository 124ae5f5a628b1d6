//! SQLite state store implementation.
//!
//! Implements `StateStore` from `arbor-core` using sqlx with split read/write
//! pools. Values are stored as JSON text and deserialized on read. Batched
//! writes run in one transaction so a response and its completion marker land
//! together.

use arbor_core::state::StateStore;
use arbor_types::error::StateError;
use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use super::pool::StatePool;

/// SQLite-backed implementation of `StateStore`.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: StatePool,
}

impl SqliteStateStore {
    /// Create a new state store backed by the given database pool.
    pub fn new(pool: StatePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn storage(e: sqlx::Error) -> StateError {
    StateError::Storage(e.to_string())
}

fn encode(key: &str, value: &Value) -> Result<String, StateError> {
    serde_json::to_string(value).map_err(|e| StateError::Serialization {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn decode(key: &str, text: &str) -> Result<Value, StateError> {
    serde_json::from_str(text).map_err(|e| StateError::Deserialization {
        key: key.to_string(),
        message: e.to_string(),
    })
}

const UPSERT: &str = r#"INSERT INTO session_state (key, value, updated_at)
   VALUES (?, ?, ?)
   ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#;

// ---------------------------------------------------------------------------
// StateStore implementation
// ---------------------------------------------------------------------------

impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        let row = sqlx::query("SELECT value FROM session_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(storage)?;

        match row {
            Some(row) => {
                let text: String = row.try_get("value").map_err(storage)?;
                Ok(Some(decode(key, &text)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StateError> {
        let text = encode(key, value)?;
        sqlx::query(UPSERT)
            .bind(key)
            .bind(&text)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool.writer)
            .await
            .map_err(storage)?;

        Ok(())
    }

    async fn set_many(&self, entries: &[(String, Value)]) -> Result<(), StateError> {
        // Encode up front so a bad value never leaves a half-written batch.
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            encoded.push((key.as_str(), encode(key, value)?));
        }
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.writer.begin().await.map_err(storage)?;
        for (key, text) in &encoded {
            sqlx::query(UPSERT)
                .bind(*key)
                .bind(text)
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }
        tx.commit().await.map_err(storage)?;

        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<(), StateError> {
        let mut tx = self.pool.writer.begin().await.map_err(storage)?;
        for key in keys {
            sqlx::query("DELETE FROM session_state WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }
        tx.commit().await.map_err(storage)?;

        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StateError> {
        let rows = sqlx::query(
            "SELECT key, value FROM session_state WHERE substr(key, 1, ?) = ? ORDER BY key",
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(storage)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let key: String = row.try_get("key").map_err(storage)?;
            let text: String = row.try_get("value").map_err(storage)?;
            let value = decode(&key, &text)?;
            entries.push((key, value));
        }

        Ok(entries)
    }
}
