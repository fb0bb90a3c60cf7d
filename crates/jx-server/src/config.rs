//! Configuration system for the JX server
//!
//! Loads configuration from:
//! 1. config.yaml - operational settings (address, database, logging)
//! 2. .env file - local overrides
//!
//! Environment variables always override config.yaml values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use jx_duck::DatabaseOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnvVar { name: String, value: String },
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file; in-memory when absent
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Seconds a deferred command may wait before the watchdog warns
    pub watchdog_secs: u64,

    /// Milliseconds between catalog flushes
    pub catalog_flush_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            watchdog_secs: 10,
            catalog_flush_ms: 1000,
        }
    }
}

impl DatabaseConfig {
    pub fn options(&self) -> DatabaseOptions {
        DatabaseOptions {
            path: self.path.clone(),
            watchdog: Duration::from_secs(self.watchdog_secs),
            catalog_flush: Duration::from_millis(self.catalog_flush_ms),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvVar {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults with environment variable overrides, for running without a file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("JX_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parsed("JX_SERVER_PORT")? {
            self.server.port = port;
        }

        if let Ok(path) = std::env::var("JX_DATABASE_PATH") {
            self.database.path = match path.as_str() {
                "" | ":memory:" => None,
                _ => Some(PathBuf::from(path)),
            };
        }
        if let Some(secs) = parsed("JX_WATCHDOG_SECS")? {
            self.database.watchdog_secs = secs;
        }
        if let Some(ms) = parsed("JX_CATALOG_FLUSH_MS")? {
            self.database.catalog_flush_ms = ms;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.logging.directory = dir;
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, None);
        assert_eq!(config.database.options().watchdog, Duration::from_secs(10));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.output, "stdout");
    }

    #[test]
    fn test_yaml_and_env_override() {
        std::env::set_var("JX_SERVER_PORT", "9090");
        std::env::set_var("JX_CATALOG_FLUSH_MS", "250");

        let config_yaml = r#"
server:
  host: "0.0.0.0"
  port: 8080
database:
  path: "/tmp/jx.duckdb"
  watchdog_secs: 5
  catalog_flush_ms: 1000
"#;
        let temp_file = std::env::temp_dir().join("jx_test_config.yaml");
        std::fs::write(&temp_file, config_yaml).unwrap();

        let config = Config::load(&temp_file).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9090); // Overridden
        assert_eq!(config.database.catalog_flush_ms, 250); // Overridden
        assert_eq!(config.database.watchdog_secs, 5);
        assert_eq!(config.logging.format, "pretty"); // Section omitted

        std::env::set_var("JX_SERVER_PORT", "not-a-port");
        assert!(matches!(
            Config::load(&temp_file),
            Err(ConfigError::InvalidEnvVar { .. })
        ));

        std::env::remove_var("JX_SERVER_PORT");
        std::env::remove_var("JX_CATALOG_FLUSH_MS");
        std::fs::remove_file(temp_file).ok();
    }
}
