//! Error types
//!
//! Every layer returns one of these instead of logging. Only the
//! [`Database`](crate::Database) orchestrator turns them into user-facing
//! messages (see [`crate::db::describe_error`]).

use crate::criteria::Operator;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a mapping file.
///
/// All of them are fatal: no partial index is ever returned.
#[derive(Error, Debug)]
pub enum MappingError {
    /// The mapping file could not be read
    #[error("could not read mapping file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record is malformed or misses a required key
    #[error("parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// The same object path was declared twice
    #[error("duplicated object '{object}' on line {line}")]
    Duplicate { line: usize, object: String },
}

/// A selection-language parse failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at position {position} near '{token}'")]
pub struct SyntaxError {
    /// Byte offset of the offending token in the input
    pub position: usize,
    /// The offending token (empty at end of input)
    pub token: String,
    pub message: String,
}

impl SyntaxError {
    pub fn new(position: usize, token: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            position,
            token: token.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur in any database operation
#[derive(Error, Debug)]
pub enum DbError {
    /// Mapping file parse/duplicate/IO failure
    #[error("Configuration error: {0}")]
    Config(#[from] MappingError),

    /// Selection language parse failure
    #[error("Syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    /// Backend unreachable or credentials rejected
    #[error("Connection error: {0}")]
    Connection(String),

    /// The session died while a query was running
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The backend rejected the SQL statement
    #[error("Query error: {0}")]
    Query(String),

    /// Criteria or selection referenced a path absent from the mapping
    #[error("Unmapped path: {0}")]
    UnmappedPath(String),

    /// The operator has no translation in the bound dialect
    #[error("Unknown operator: {0}")]
    UnknownOperator(Operator),

    /// Optional capability absent on the bound format or backend
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid column: {0}")]
    InvalidColumn(String),

    #[error("Format plugin not found: {0}")]
    FormatNotFound(String),

    #[error("SQL backend not found: {0}")]
    BackendNotFound(String),

    /// The database schema version is not handled by the format plugin
    #[error("Format '{format}' does not support schema version {version}")]
    IncompatibleVersion { format: String, version: String },

    /// The `_format` metadata relation is missing or malformed
    #[error("Format detection failed: {0}")]
    FormatDetection(String),
}

impl DbError {
    /// Short name of the error class, used as message prefix.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration error",
            Self::Syntax(_) => "syntax error",
            Self::Connection(_) => "connection error",
            Self::ConnectionLost(_) => "connection lost",
            Self::Query(_) => "query error",
            Self::UnmappedPath(_) => "unmapped path",
            Self::UnknownOperator(_) => "unknown operator",
            Self::NotSupported(_) => "operation not supported",
            Self::InvalidValue(_) => "invalid value",
            Self::InvalidColumn(_) => "invalid column",
            Self::FormatNotFound(_) => "cannot load format plugin",
            Self::BackendNotFound(_) => "cannot load sql plugin",
            Self::IncompatibleVersion { .. } => "incompatible schema version",
            Self::FormatDetection(_) => "format detection failed",
        }
    }

    /// Whether the caller may reconnect and retry.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::ConnectionLost(_))
    }
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::UnmappedPath("alert.foo".to_string());
        assert_eq!(err.to_string(), "Unmapped path: alert.foo");

        let err = DbError::Config(MappingError::Duplicate {
            line: 4,
            object: "alert.create_time".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: duplicated object 'alert.create_time' on line 4"
        );
    }

    #[test]
    fn test_syntax_error_display() {
        let err = SyntaxError::new(5, "(x", "unexpected token");
        assert_eq!(err.to_string(), "unexpected token at position 5 near '(x'");
    }

    #[test]
    fn test_connection_errors_are_flagged() {
        assert!(DbError::ConnectionLost("gone".into()).is_connection_error());
        assert!(DbError::Connection("refused".into()).is_connection_error());
        assert!(!DbError::Query("syntax".into()).is_connection_error());
    }
}
