//! # idmefdb
//!
//! Query and mapping layer for IDMEF alerts and heartbeats stored in a
//! relational database.
//!
//! ## Features
//!
//! - **Object paths**: `alert.source(0).node.address(0).address` style addressing
//! - **Mapping files**: declarative object path to table/column bindings
//! - **Selections**: `count(alert.create_time)/group_by,order_desc` projections
//! - **Criteria**: boolean filters compiled to dialect-specific SQL
//! - **Plugins**: SQL backends and storage formats behind traits
//!
//! ## Modules
//!
//! - [`mapping`]: Mapping file parser and index
//! - [`selection`]: Path selection language
//! - [`criteria`]: Criteria trees and their SQL compiler
//! - [`sql`]: Backend sessions, dialects and result tables
//! - [`format`]: Format plugins, including the classic schema
//! - [`db`]: Database handle binding a session to a format
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use idmefdb::*;
//!
//! fn main() -> DbResult<()> {
//!     let registry = PluginRegistry::with_builtins()?;
//!     let sql = registry.open_sql(&SqlSettings::sqlite("events.db"))?;
//!     let db = Database::install(sql, &registry, "classic")?;
//!
//!     let alert = Message::alert()
//!         .with("alert.messageid", "m-1")?
//!         .with("alert.classification.text", "ping sweep")?;
//!     db.insert(&alert)?;
//!
//!     let selection = PathSelection::compile(
//!         "alert.classification.text/group_by, count(alert.messageid)/order_desc",
//!     )?;
//!     if let Some(rows) = db.get_values(selection, None, ValuesQuery::default())? {
//!         while let Some(row) = rows.get_next()? {
//!             println!("{:?}", row);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod criteria;
pub mod db;
pub mod error;
pub mod format;
pub mod mapping;
pub mod path;
pub mod registry;
pub mod result;
pub mod selection;
pub mod sql;
pub mod value;

pub use config::Config;
pub use criteria::{Criteria, Operator};
pub use db::{describe_error, Database};
pub use error::{DbError, DbResult};
pub use format::{ClassicFormat, FormatPlugin, IdentsOrder, ValuesQuery, Window};
pub use mapping::MappingIndex;
pub use path::ObjectPath;
pub use registry::PluginRegistry;
pub use result::{IdentsResult, ValuesResult};
pub use selection::PathSelection;
pub use sql::{Sql, SqlSettings};
pub use value::{Message, MessageKind, Value};
