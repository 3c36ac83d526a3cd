//! Backend contract
//!
//! A [`SqlPlugin`] opens sessions; each session is a [`SqlBackend`] owning
//! one physical connection. Dropping the backend closes the connection.

use crate::error::{DbError, DbResult};
use crate::mapping::parser::{split_pair, split_tokens};
use crate::sql::dialect::SqlDialect;
use crate::sql::table::QueryOutcome;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Connection settings handed to [`SqlPlugin::open`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlSettings {
    /// Backend plugin name (`sqlite`, `pgsql`, ...)
    pub backend: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
    /// Database file, for file based backends
    pub file: Option<String>,
}

impl SqlSettings {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            ..Default::default()
        }
    }

    /// SQLite settings for `file` (`:memory:` for a private database)
    pub fn sqlite(file: impl Into<String>) -> Self {
        Self {
            backend: "sqlite".to_string(),
            file: Some(file.into()),
            ..Default::default()
        }
    }
}

impl FromStr for SqlSettings {
    type Err = DbError;

    /// Parse `type=sqlite file=/var/lib/events.db` style settings.
    ///
    /// Values may be quoted like mapping file values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut settings = SqlSettings::default();

        for token in split_tokens(s).map_err(DbError::InvalidValue)? {
            let (key, value) = split_pair(token).map_err(DbError::InvalidValue)?;
            let value = Some(value).filter(|v| !v.is_empty());

            match key.as_str() {
                "type" | "backend" => settings.backend = value.unwrap_or_default(),
                "host" => settings.host = value,
                "port" => {
                    settings.port = value
                        .map(|v| {
                            v.parse().map_err(|_| {
                                DbError::InvalidValue(format!("invalid port '{}'", v))
                            })
                        })
                        .transpose()?
                }
                "name" => settings.name = value,
                "user" => settings.user = value,
                "pass" => settings.pass = value,
                "file" => settings.file = value,
                _ => {
                    return Err(DbError::InvalidValue(format!(
                        "unknown setting '{}'",
                        key
                    )))
                }
            }
        }

        if settings.backend.is_empty() {
            return Err(DbError::InvalidValue("missing 'type' setting".to_string()));
        }

        Ok(settings)
    }
}

/// One open session on a relational backend
pub trait SqlBackend: Send {
    /// Fragment builders for this backend's SQL
    fn dialect(&self) -> &dyn SqlDialect;

    /// Run one statement.
    ///
    /// Returns [`QueryOutcome::NoRows`] for statements without rows and for
    /// queries whose result set is empty.
    fn query(&mut self, sql: &str) -> DbResult<QueryOutcome>;

    /// Identity generated by the last insert on this session
    fn last_insert_ident(&mut self) -> DbResult<u64>;

    /// Backend version number, informational
    fn server_version(&self) -> i64;

    /// Run a multi-statement script, e.g. a schema
    fn execute_script(&mut self, _script: &str) -> DbResult<()> {
        Err(DbError::NotSupported(format!(
            "{} backend cannot run scripts",
            self.dialect().name()
        )))
    }
}

/// Factory for [`SqlBackend`] sessions
pub trait SqlPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, settings: &SqlSettings) -> DbResult<Box<dyn SqlBackend>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_string() {
        let settings: SqlSettings = "type=pgsql host=db.local port=5432 name=prelude user=prelude pass='s3cr et'"
            .parse()
            .unwrap();

        assert_eq!(settings.backend, "pgsql");
        assert_eq!(settings.host.as_deref(), Some("db.local"));
        assert_eq!(settings.port, Some(5432));
        assert_eq!(settings.pass.as_deref(), Some("s3cr et"));
        assert_eq!(settings.file, None);
    }

    #[test]
    fn test_settings_errors() {
        assert!("host=x".parse::<SqlSettings>().is_err());
        assert!("type=sqlite port=abc".parse::<SqlSettings>().is_err());
        assert!("type=sqlite colour=red".parse::<SqlSettings>().is_err());
    }

    #[test]
    fn test_sqlite_shortcut() {
        let settings = SqlSettings::sqlite(":memory:");
        assert_eq!(settings.backend, "sqlite");
        assert_eq!(settings.file.as_deref(), Some(":memory:"));
    }
}
