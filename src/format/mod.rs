//! Format Plugins
//!
//! A format knows one concrete relational schema: how messages are split
//! into tables, how they are read back and how queries over them are
//! assembled. The [`Database`](crate::Database) dispatches every data
//! operation through the bound [`FormatPlugin`].
//!
//! - [`classic`]: the mapping-driven `classic` schema

pub mod classic;

pub use classic::ClassicFormat;

use crate::criteria::Criteria;
use crate::error::{DbError, DbResult};
use crate::mapping::MappingIndex;
use crate::path::ObjectPath;
use crate::result::{IdentsResource, ValuesResource};
use crate::selection::PathSelection;
use crate::sql::Sql;
use crate::value::{Message, MessageKind, Value};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Ordering of an idents query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentsOrder {
    #[default]
    None,
    CreateTimeAsc,
    CreateTimeDesc,
}

impl FromStr for IdentsOrder {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "asc" | "create_time_asc" => Ok(Self::CreateTimeAsc),
            "desc" | "create_time_desc" => Ok(Self::CreateTimeDesc),
            other => Err(DbError::InvalidValue(format!("unknown order '{}'", other))),
        }
    }
}

/// Row window shared by idents and values queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Window {
    pub fn new(limit: Option<u64>, offset: Option<u64>) -> Self {
        Self { limit, offset }
    }
}

/// Options of a values query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValuesQuery {
    pub distinct: bool,
    pub window: Window,
}

/// One `path = value` assignment of an update; `None` stores NULL
pub type Assignment = (ObjectPath, Option<Value>);

/// Schema-specific storage logic
pub trait FormatPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Schema version written by this format
    fn schema_version(&self) -> &'static str;

    /// Reject schema versions this format cannot read
    fn check_schema_version(&self, version: &str) -> DbResult<()>;

    fn mapping(&self) -> &MappingIndex;

    /// Create the schema on an empty database
    fn install_schema(&self, _sql: &mut Sql) -> DbResult<()> {
        Err(DbError::NotSupported(format!(
            "format '{}' cannot install its schema",
            self.name()
        )))
    }

    /// Store a message, returning its ident
    fn insert_message(&self, sql: &mut Sql, message: &Message) -> DbResult<u64>;

    /// Idents of messages matching `criteria`; `None` when nothing matches
    fn get_idents(
        &self,
        sql: &mut Sql,
        kind: MessageKind,
        criteria: Option<&Criteria>,
        window: Window,
        order: IdentsOrder,
    ) -> DbResult<Option<Box<dyn IdentsResource>>>;

    /// Fetch one message; `None` when the ident does not exist
    fn get_message(&self, sql: &mut Sql, kind: MessageKind, ident: u64)
        -> DbResult<Option<Message>>;

    /// Delete messages, returning how many existed
    fn delete_messages(&self, sql: &mut Sql, kind: MessageKind, idents: &[u64]) -> DbResult<usize>;

    /// Selected values of messages matching `criteria`; `None` when no rows
    fn get_values(
        &self,
        sql: &mut Sql,
        selection: &PathSelection,
        criteria: Option<&Criteria>,
        query: ValuesQuery,
    ) -> DbResult<Option<Box<dyn ValuesResource>>>;

    /// Apply `assignments` to the messages matching `criteria`
    fn update(
        &self,
        _sql: &mut Sql,
        _assignments: &[Assignment],
        _criteria: Option<&Criteria>,
        _window: Window,
        _order: IdentsOrder,
    ) -> DbResult<usize> {
        Err(DbError::NotSupported(format!(
            "format '{}' cannot update messages",
            self.name()
        )))
    }

    /// Apply `assignments` to the listed messages
    fn update_from_list(
        &self,
        _sql: &mut Sql,
        _assignments: &[Assignment],
        _kind: MessageKind,
        _idents: &[u64],
    ) -> DbResult<usize> {
        Err(DbError::NotSupported(format!(
            "format '{}' cannot update messages",
            self.name()
        )))
    }
}
