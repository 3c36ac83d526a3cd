//! Plugin registry
//!
//! Owns the SQL backend plugins and format plugins known to the process.
//! The registry is an ordinary value: build it with [`PluginRegistry::init`]
//! and hand it to whoever opens databases.

use crate::error::{DbError, DbResult};
use crate::format::{ClassicFormat, FormatPlugin};
use crate::sql::{Sql, SqlPlugin, SqlSettings, SqlitePlugin};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Named SQL and format plugins
#[derive(Default)]
pub struct PluginRegistry {
    sql: HashMap<String, Arc<dyn SqlPlugin>>,
    formats: HashMap<String, Arc<dyn FormatPlugin>>,
}

impl PluginRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in plugins
    pub fn with_builtins() -> DbResult<Self> {
        let mut registry = Self::new();
        registry.init()?;
        Ok(registry)
    }

    /// Register the built-in plugins (`sqlite`, `classic`).
    ///
    /// Plugins registered earlier under the same names are kept.
    pub fn init(&mut self) -> DbResult<()> {
        if !self.sql.contains_key("sqlite") {
            self.register_sql(Arc::new(SqlitePlugin));
        }
        if !self.formats.contains_key("classic") {
            self.register_format(Arc::new(ClassicFormat::with_default_mapping()?));
        }
        Ok(())
    }

    /// Drop every registered plugin
    pub fn shutdown(&mut self) {
        debug!(
            "releasing {} sql and {} format plugins",
            self.sql.len(),
            self.formats.len()
        );
        self.sql.clear();
        self.formats.clear();
    }

    /// Register (or replace) a SQL plugin under its name
    pub fn register_sql(&mut self, plugin: Arc<dyn SqlPlugin>) {
        self.sql.insert(plugin.name().to_lowercase(), plugin);
    }

    /// Register (or replace) a format plugin under its name
    pub fn register_format(&mut self, plugin: Arc<dyn FormatPlugin>) {
        self.formats.insert(plugin.name().to_lowercase(), plugin);
    }

    pub fn sql_plugin(&self, name: &str) -> DbResult<Arc<dyn SqlPlugin>> {
        self.sql
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| DbError::BackendNotFound(name.to_string()))
    }

    pub fn format(&self, name: &str) -> DbResult<Arc<dyn FormatPlugin>> {
        self.formats
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| DbError::FormatNotFound(name.to_string()))
    }

    /// Open a session with the plugin named by `settings.backend`
    pub fn open_sql(&self, settings: &SqlSettings) -> DbResult<Sql> {
        let plugin = self.sql_plugin(&settings.backend)?;
        debug!("opening {} session", plugin.name());
        Ok(Sql::new(plugin.open(settings)?))
    }

    pub fn sql_plugin_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sql.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn format_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.formats.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("sql", &self.sql_plugin_names())
            .field("formats", &self.format_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_registers_builtins() {
        let registry = PluginRegistry::with_builtins().unwrap();
        assert_eq!(registry.sql_plugin_names(), vec!["sqlite"]);
        assert_eq!(registry.format_names(), vec!["classic"]);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = PluginRegistry::with_builtins().unwrap();
        assert_eq!(registry.sql_plugin("SQLite").unwrap().name(), "sqlite");
        assert_eq!(registry.format("Classic").unwrap().name(), "classic");
    }

    #[test]
    fn test_unknown_plugins() {
        let registry = PluginRegistry::with_builtins().unwrap();
        assert!(matches!(
            registry.sql_plugin("pgsql"),
            Err(DbError::BackendNotFound(name)) if name == "pgsql"
        ));
        assert!(matches!(
            registry.format("prelude"),
            Err(DbError::FormatNotFound(_))
        ));
    }

    #[test]
    fn test_shutdown_releases_plugins() {
        let mut registry = PluginRegistry::with_builtins().unwrap();
        let format = registry.format("classic").unwrap();
        assert_eq!(Arc::strong_count(&format), 2);

        registry.shutdown();
        assert_eq!(Arc::strong_count(&format), 1);
        assert!(registry.format_names().is_empty());
        assert!(registry.sql_plugin("sqlite").is_err());
    }

    #[test]
    fn test_open_sql() {
        let registry = PluginRegistry::with_builtins().unwrap();
        let mut sql = registry.open_sql(&SqlSettings::sqlite(":memory:")).unwrap();
        assert_eq!(sql.dialect().name(), "sqlite");
        sql.execute("CREATE TABLE t (v INTEGER)").unwrap();

        let err = registry
            .open_sql(&SqlSettings::new("mysql"))
            .unwrap_err();
        assert!(matches!(err, DbError::BackendNotFound(_)));
    }
}
