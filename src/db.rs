//! Database handle
//!
//! [`Database`] binds one SQL session to one format plugin and is the
//! entry point for every data operation. It is also the only layer that
//! turns errors into user-facing text ([`describe_error`]).
//!
//! # Format detection
//!
//! Without an explicit format, the handle reads the single row of the
//! `_format (name, version)` relation, binds the format of that name and
//! lets it validate the schema version.

use crate::criteria::Criteria;
use crate::error::{DbError, DbResult};
use crate::format::{Assignment, FormatPlugin, IdentsOrder, ValuesQuery, Window};
use crate::mapping::MappingIndex;
use crate::registry::PluginRegistry;
use crate::result::{IdentsResult, ValuesResult};
use crate::selection::PathSelection;
use crate::sql::{Sql, SqlSettings};
use crate::value::{Message, MessageKind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

struct DatabaseInner {
    sql: Mutex<Sql>,
    format: Arc<dyn FormatPlugin>,
    format_version: Option<String>,
}

/// A session bound to a format. Clones share the session.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Bind `sql` to `format`, or to the format recorded in `_format`.
    ///
    /// An explicit format is trusted: its schema version is not checked.
    pub fn new(mut sql: Sql, registry: &PluginRegistry, format: Option<&str>) -> DbResult<Self> {
        if let Some(name) = format {
            return Ok(Self::with_format(sql, registry.format(name)?));
        }

        let (name, version) = detect_format(&mut sql)?;
        let format = registry.format(&name)?;
        format.check_schema_version(&version)?;

        info!("database format {} version {}", format.name(), version);
        Ok(Self::bind(sql, format, Some(version)))
    }

    /// Bind `sql` to an already resolved format
    pub fn with_format(sql: Sql, format: Arc<dyn FormatPlugin>) -> Self {
        debug!("database format {} (explicit)", format.name());
        Self::bind(sql, format, None)
    }

    /// Open a session from `settings` and bind it
    pub fn open(
        registry: &PluginRegistry,
        settings: &SqlSettings,
        format: Option<&str>,
    ) -> DbResult<Self> {
        Self::new(registry.open_sql(settings)?, registry, format)
    }

    /// Install the schema of `format` on an empty database and bind it
    pub fn install(mut sql: Sql, registry: &PluginRegistry, format: &str) -> DbResult<Self> {
        let format = registry.format(format)?;
        format.install_schema(&mut sql)?;

        info!(
            "installed {} schema version {}",
            format.name(),
            format.schema_version()
        );
        let version = format.schema_version().to_string();
        Ok(Self::bind(sql, format, Some(version)))
    }

    fn bind(sql: Sql, format: Arc<dyn FormatPlugin>, format_version: Option<String>) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                sql: Mutex::new(sql),
                format,
                format_version,
            }),
        }
    }

    fn session(&self) -> MutexGuard<'_, Sql> {
        self.inner.sql.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn format(&self) -> &dyn FormatPlugin {
        self.inner.format.as_ref()
    }

    pub fn format_name(&self) -> &str {
        self.format().name()
    }

    /// Schema version read at detection; `None` for an explicit format
    pub fn format_version(&self) -> Option<&str> {
        self.inner.format_version.as_deref()
    }

    pub fn server_version(&self) -> i64 {
        self.session().server_version()
    }

    pub fn mapping(&self) -> &MappingIndex {
        self.format().mapping()
    }

    /// Store a message, returning its ident
    pub fn insert(&self, message: &Message) -> DbResult<u64> {
        self.format().insert_message(&mut self.session(), message)
    }

    /// Idents of `kind` messages matching `criteria`; `None` when nothing matches
    pub fn get_idents(
        &self,
        kind: MessageKind,
        criteria: Option<&Criteria>,
        window: Window,
        order: IdentsOrder,
    ) -> DbResult<Option<IdentsResult>> {
        let resource = self
            .format()
            .get_idents(&mut self.session(), kind, criteria, window, order)?;
        Ok(resource.map(|r| IdentsResult::new(r, self.clone())))
    }

    pub fn get_alert_idents(
        &self,
        criteria: Option<&Criteria>,
        window: Window,
        order: IdentsOrder,
    ) -> DbResult<Option<IdentsResult>> {
        self.get_idents(MessageKind::Alert, criteria, window, order)
    }

    pub fn get_heartbeat_idents(
        &self,
        criteria: Option<&Criteria>,
        window: Window,
        order: IdentsOrder,
    ) -> DbResult<Option<IdentsResult>> {
        self.get_idents(MessageKind::Heartbeat, criteria, window, order)
    }

    pub fn get_message(&self, kind: MessageKind, ident: u64) -> DbResult<Option<Message>> {
        self.format().get_message(&mut self.session(), kind, ident)
    }

    pub fn get_alert(&self, ident: u64) -> DbResult<Option<Message>> {
        self.get_message(MessageKind::Alert, ident)
    }

    pub fn get_heartbeat(&self, ident: u64) -> DbResult<Option<Message>> {
        self.get_message(MessageKind::Heartbeat, ident)
    }

    /// Delete messages, returning how many existed
    pub fn delete_from_list(&self, kind: MessageKind, idents: &[u64]) -> DbResult<usize> {
        self.format()
            .delete_messages(&mut self.session(), kind, idents)
    }

    /// Delete the messages a result still yields. The result is drained.
    pub fn delete_from_result_idents(
        &self,
        kind: MessageKind,
        result: &IdentsResult,
    ) -> DbResult<usize> {
        let idents = result.collect_remaining()?;
        self.delete_from_list(kind, &idents)
    }

    /// Whether the alert existed
    pub fn delete_alert(&self, ident: u64) -> DbResult<bool> {
        Ok(self.delete_from_list(MessageKind::Alert, &[ident])? > 0)
    }

    pub fn delete_alert_from_list(&self, idents: &[u64]) -> DbResult<usize> {
        self.delete_from_list(MessageKind::Alert, idents)
    }

    pub fn delete_alert_from_result_idents(&self, result: &IdentsResult) -> DbResult<usize> {
        self.delete_from_result_idents(MessageKind::Alert, result)
    }

    pub fn delete_heartbeat(&self, ident: u64) -> DbResult<bool> {
        Ok(self.delete_from_list(MessageKind::Heartbeat, &[ident])? > 0)
    }

    pub fn delete_heartbeat_from_list(&self, idents: &[u64]) -> DbResult<usize> {
        self.delete_from_list(MessageKind::Heartbeat, idents)
    }

    pub fn delete_heartbeat_from_result_idents(&self, result: &IdentsResult) -> DbResult<usize> {
        self.delete_from_result_idents(MessageKind::Heartbeat, result)
    }

    /// Values of `selection` over messages matching `criteria`.
    ///
    /// The result keeps `selection` alive for as long as any of its handles.
    pub fn get_values(
        &self,
        selection: impl Into<Arc<PathSelection>>,
        criteria: Option<&Criteria>,
        query: ValuesQuery,
    ) -> DbResult<Option<ValuesResult>> {
        let selection = selection.into();
        let resource =
            self.format()
                .get_values(&mut self.session(), &selection, criteria, query)?;
        Ok(resource.map(|r| ValuesResult::new(r, selection, self.clone())))
    }

    /// Apply `assignments` to messages matching `criteria`
    pub fn update(
        &self,
        assignments: &[Assignment],
        criteria: Option<&Criteria>,
        window: Window,
        order: IdentsOrder,
    ) -> DbResult<usize> {
        self.format()
            .update(&mut self.session(), assignments, criteria, window, order)
    }

    pub fn update_from_list(
        &self,
        assignments: &[Assignment],
        kind: MessageKind,
        idents: &[u64],
    ) -> DbResult<usize> {
        self.format()
            .update_from_list(&mut self.session(), assignments, kind, idents)
    }

    /// Apply `assignments` to the messages a result still yields
    pub fn update_from_result_idents(
        &self,
        assignments: &[Assignment],
        kind: MessageKind,
        result: &IdentsResult,
    ) -> DbResult<usize> {
        let idents = result.collect_remaining()?;
        self.update_from_list(assignments, kind, &idents)
    }

    /// Begin an explicit transaction. Format operations stop opening their
    /// own transactions until it ends.
    pub fn transaction_start(&self) -> DbResult<()> {
        self.session().transaction_start()?;
        debug!("transaction started");
        Ok(())
    }

    pub fn transaction_end(&self) -> DbResult<()> {
        self.session().transaction_end()?;
        debug!("transaction committed");
        Ok(())
    }

    pub fn transaction_abort(&self) -> DbResult<()> {
        self.session().transaction_abort()?;
        debug!("transaction aborted");
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.session().in_transaction()
    }

    /// User-facing text for an error raised by this handle
    pub fn describe_error(&self, err: &DbError) -> String {
        describe_error(err)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("format", &self.format_name())
            .field("format_version", &self.format_version())
            .finish()
    }
}

/// Read `(name, version)` from the `_format` relation
fn detect_format(sql: &mut Sql) -> DbResult<(String, String)> {
    let table = match sql.query_table("SELECT name, version FROM _format") {
        Ok(Some(table)) => table,
        Ok(None) => return Err(DbError::FormatDetection("_format is empty".to_string())),
        Err(e) if e.is_connection_error() => return Err(e),
        Err(e) => return Err(DbError::FormatDetection(e.to_string())),
    };

    if table.row_count() != 1 {
        return Err(DbError::FormatDetection(format!(
            "_format holds {} rows, expected one",
            table.row_count()
        )));
    }

    let text = |column: usize| -> DbResult<String> {
        table
            .field(0, column)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DbError::FormatDetection(format!("_format column {} is NULL", column)))
    };

    Ok((text(0)?, text(1)?))
}

/// `"<category>: <detail>"`
pub fn describe_error(err: &DbError) -> String {
    let detail = match err {
        DbError::Config(e) => e.to_string(),
        DbError::Syntax(e) => e.to_string(),
        DbError::Connection(m)
        | DbError::ConnectionLost(m)
        | DbError::Query(m)
        | DbError::UnmappedPath(m)
        | DbError::NotSupported(m)
        | DbError::InvalidValue(m)
        | DbError::InvalidColumn(m)
        | DbError::FormatNotFound(m)
        | DbError::BackendNotFound(m)
        | DbError::FormatDetection(m) => m.clone(),
        DbError::UnknownOperator(op) => op.to_string(),
        DbError::IncompatibleVersion { format, version } => {
            format!("format '{}' cannot read schema version {}", format, version)
        }
    };
    format!("{}: {}", err.category(), detail)
}
