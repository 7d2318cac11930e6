//! Configuration management for authgate.
//!
//! Settings are layered: built-in defaults, then an optional file (format
//! picked from its extension), then `AUTHGATE__`-prefixed environment
//! variables, e.g. `AUTHGATE__STORE__HIGH_WATER_MARK=50000`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AuthgateError, Result};

/// Main configuration for authgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bucket store configuration
    #[serde(default)]
    pub store: MemoryStoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Identifier hashing configuration
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Path to the action policy file
    #[serde(default)]
    pub policies_path: Option<String>,
}

/// Bounded memory store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// Entry count that triggers eviction
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// Entries removed per eviction round
    #[serde(default = "default_eviction_count")]
    pub eviction_count: usize,

    /// Background sweep interval in milliseconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            high_water_mark: default_high_water_mark(),
            eviction_count: default_eviction_count(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

fn default_high_water_mark() -> usize {
    10_000
}

fn default_eviction_count() -> usize {
    1_000
}

fn default_sweep_interval() -> u64 {
    60_000
}

impl MemoryStoreConfig {
    /// Reject settings the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.high_water_mark == 0 {
            return Err(AuthgateError::Config(
                "store.high_water_mark must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(AuthgateError::Config(
                "store.sweep_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Identifier hashing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Secret key for hashing emails and phone numbers
    #[serde(default)]
    pub secret: Option<String>,
}

impl AppConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("AUTHGATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AuthgateError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(yaml).map_err(|e| AuthgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.store.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.store.high_water_mark, 10_000);
        assert_eq!(config.store.eviction_count, 1_000);
        assert_eq!(config.store.sweep_interval_ms, 60_000);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(config.identity.secret.is_none());
        assert!(config.policies_path.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AppConfig::from_yaml(
            r#"
store:
  high_water_mark: 500
logging:
  json: true
policies_path: /etc/authgate/policies.yaml
"#,
        )
        .unwrap();

        assert_eq!(config.store.high_water_mark, 500);
        assert_eq!(config.store.eviction_count, 1_000);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.policies_path.as_deref(), Some("/etc/authgate/policies.yaml"));
    }

    #[test]
    fn test_invalid_store_config_rejected() {
        let err = AppConfig::from_yaml("store:\n  high_water_mark: 0\n").unwrap_err();
        assert!(matches!(err, AuthgateError::Config(_)));

        let err = AppConfig::from_yaml("store:\n  sweep_interval_ms: 0\n").unwrap_err();
        assert!(matches!(err, AuthgateError::Config(_)));
    }

    #[test]
    fn test_load_file_with_env_override() {
        let path = std::env::temp_dir().join(format!("authgate-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "store:\n  high_water_mark: 2000\n  eviction_count: 100\nidentity:\n  secret: from-file\n",
        )
        .unwrap();

        std::env::set_var("AUTHGATE__STORE__EVICTION_COUNT", "250");
        let config = AppConfig::load(Some(&path));
        std::env::remove_var("AUTHGATE__STORE__EVICTION_COUNT");
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.store.high_water_mark, 2_000);
        assert_eq!(config.store.eviction_count, 250);
        assert_eq!(config.identity.secret.as_deref(), Some("from-file"));
    }
}
