//! Engine configuration types for Arbor.
//!
//! `EngineConfig` represents the optional `arbor.toml` that tunes defaults the
//! workflow documents themselves do not declare.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Arbor engine.
///
/// Loaded from `<data dir>/arbor.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite URL for the persistent state store. `None` uses the data directory.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Node-level deadline applied when a node declares no `Timeout`.
    #[serde(default)]
    pub default_node_timeout_ms: Option<u64>,

    /// Maximum nesting depth of subroutine sessions.
    #[serde(default = "default_max_subroutine_depth")]
    pub max_subroutine_depth: u32,
}

fn default_max_subroutine_depth() -> u32 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            default_node_timeout_ms: None,
            max_subroutine_depth: default_max_subroutine_depth(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_subroutine_depth, 5);
        assert!(config.database_url.is_none());
        assert!(config.default_node_timeout_ms.is_none());
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
database_url = "sqlite:///tmp/arbor.db"
default_node_timeout_ms = 30000
max_subroutine_depth = 2
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite:///tmp/arbor.db"));
        assert_eq!(config.default_node_timeout_ms, Some(30_000));
        assert_eq!(config.max_subroutine_depth, 2);
    }
}
