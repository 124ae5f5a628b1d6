//! Engine configuration loader for Arbor.
//!
//! Reads `arbor.toml` from the data directory (`~/.arbor/` in production) and
//! deserializes it into [`EngineConfig`]. Falls back to defaults when the file
//! is missing or malformed.

use std::path::Path;

use arbor_types::config::EngineConfig;

/// File name of the engine configuration inside the data directory.
pub const CONFIG_FILE: &str = "arbor.toml";

/// Load engine configuration from `{data_dir}/arbor.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
database_url = "sqlite:///tmp/arbor-test.db"
default_node_timeout_ms = 30000
max_subroutine_depth = 2
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.database_url.as_deref(), Some("sqlite:///tmp/arbor-test.db"));
        assert_eq!(config.default_node_timeout_ms, Some(30_000));
        assert_eq!(config.max_subroutine_depth, 2);
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }
}
