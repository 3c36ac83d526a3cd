//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::sql::SqlSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub format: FormatConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQL plugin name
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Database file, for file based backends
    #[serde(default = "default_db_file")]
    pub file: Option<String>,

    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

fn default_db_file() -> Option<String> {
    let path = dirs::data_local_dir()
        .map(|p| p.join("idmefdb").join("events.db"))
        .unwrap_or_else(|| PathBuf::from("./idmefdb.db"));
    Some(path.to_string_lossy().to_string())
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            file: default_db_file(),
            host: None,
            port: None,
            name: None,
            user: None,
            pass: None,
        }
    }
}

impl DatabaseConfig {
    /// Settings handed to the SQL plugin
    pub fn to_sql_settings(&self) -> SqlSettings {
        SqlSettings {
            backend: self.backend.clone(),
            host: self.host.clone(),
            port: self.port,
            name: self.name.clone(),
            user: self.user.clone(),
            pass: self.pass.clone(),
            file: self.file.clone(),
        }
    }
}

/// Format plugin configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatConfig {
    /// Format to bind; detected from the database when unset
    pub name: Option<String>,

    /// Mapping file replacing the embedded classic mapping
    pub mapping_file: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("idmefdb").join("config.toml")),
            Some(PathBuf::from("/etc/idmefdb/config.toml")),
            Some(PathBuf::from("./idmefdb.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply `IDMEFDB_*` environment variables
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Database overrides
        if let Some(backend) = var("IDMEFDB_BACKEND") {
            self.database.backend = backend;
        }
        if let Some(file) = var("IDMEFDB_DB_FILE") {
            self.database.file = Some(file);
        }
        if let Some(host) = var("IDMEFDB_DB_HOST") {
            self.database.host = Some(host);
        }
        if let Some(port) = var("IDMEFDB_DB_PORT") {
            if let Ok(p) = port.parse() {
                self.database.port = Some(p);
            }
        }
        if let Some(name) = var("IDMEFDB_DB_NAME") {
            self.database.name = Some(name);
        }
        if let Some(user) = var("IDMEFDB_DB_USER") {
            self.database.user = Some(user);
        }
        if let Some(pass) = var("IDMEFDB_DB_PASS") {
            self.database.pass = Some(pass);
        }

        // Format overrides
        if let Some(name) = var("IDMEFDB_FORMAT") {
            self.format.name = Some(name);
        }
        if let Some(mapping) = var("IDMEFDB_MAPPING_FILE") {
            self.format.mapping_file = Some(mapping);
        }

        // Logging overrides
        if let Some(level) = var("IDMEFDB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("IDMEFDB_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# idmefdb Configuration
#
# Environment variables override these settings:
# - IDMEFDB_BACKEND
# - IDMEFDB_DB_FILE, IDMEFDB_DB_HOST, IDMEFDB_DB_PORT
# - IDMEFDB_DB_NAME, IDMEFDB_DB_USER, IDMEFDB_DB_PASS
# - IDMEFDB_FORMAT
# - IDMEFDB_MAPPING_FILE
# - IDMEFDB_LOG_LEVEL
# - IDMEFDB_LOG_FORMAT

[database]
# SQL plugin: sqlite
backend = "sqlite"

# Database file (sqlite)
file = "~/.local/share/idmefdb/events.db"

# Server settings (network backends)
# host = "localhost"
# port = 5432
# name = "prelude"
# user = "prelude"
# pass = ""

[format]
# Format plugin; detected from the _format table when unset
# name = "classic"

# Mapping file replacing the built-in classic mapping
# mapping_file = "/etc/idmefdb/classic.map"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.database.backend, "sqlite");
        assert_eq!(
            config.database.file.as_deref(),
            Some("~/.local/share/idmefdb/events.db")
        );
        assert_eq!(config.format.name, None);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[format]\nname = \"classic\"\n[logging]\nlevel = \"debug\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.format.name.as_deref(), Some("classic"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.database.backend, "sqlite");
        assert!(config.database.file.is_some());
    }

    #[test]
    fn test_load_errors() {
        let err = Config::load(Path::new("/nonexistent/idmefdb.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[database\nbackend = 3").unwrap();
        assert!(matches!(
            Config::load(file.path()).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("IDMEFDB_DB_FILE", "/tmp/events.db"),
            ("IDMEFDB_DB_PORT", "5433"),
            ("IDMEFDB_FORMAT", "classic"),
            ("IDMEFDB_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.file.as_deref(), Some("/tmp/events.db"));
        assert_eq!(config.database.port, Some(5433));
        assert_eq!(config.format.name.as_deref(), Some("classic"));
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_sql_settings() {
        let mut config = Config::default();
        config.database.file = Some(":memory:".to_string());

        let settings = config.database.to_sql_settings();
        assert_eq!(settings, SqlSettings::sqlite(":memory:"));
    }
}
