//! Event values and messages
//!
//! A [`Message`] is a flat view of one IDMEF alert or heartbeat: every
//! populated leaf keyed by its [`ObjectPath`].

use crate::error::{DbError, DbResult};
use crate::path::ObjectPath;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Leaf value of an event field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Time(DateTime<FixedOffset>),
    Binary(Vec<u8>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Self::Time(t) => Some(t),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Time(_) => "time",
            Self::Binary(_) => "binary",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Binary(b) => {
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(t: DateTime<FixedOffset>) -> Self {
        Self::Time(t)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Time(t.fixed_offset())
    }
}

/// Render a time as the `YYYY-MM-DD HH:MM:SS` UTC text stored in SQL
pub fn sql_timestamp(t: &DateTime<FixedOffset>) -> String {
    t.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Rebuild a time from its stored UTC text, microseconds and GMT offset
pub fn time_from_parts(text: &str, usec: u32, gmtoff: i32) -> DbResult<DateTime<FixedOffset>> {
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| DbError::InvalidValue(format!("invalid timestamp '{}': {}", text, e)))?;
    let naive = naive + chrono::Duration::microseconds(i64::from(usec));

    let offset = FixedOffset::east_opt(gmtoff)
        .ok_or_else(|| DbError::InvalidValue(format!("invalid GMT offset {}", gmtoff)))?;

    Ok(Utc.from_utc_datetime(&naive).with_timezone(&offset))
}

/// Kind of stored message, named after its root path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Alert,
    Heartbeat,
}

impl MessageKind {
    /// Root element of every path of this kind
    pub fn root(self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root())
    }
}

impl std::str::FromStr for MessageKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alert" => Ok(Self::Alert),
            "heartbeat" => Ok(Self::Heartbeat),
            other => Err(DbError::InvalidValue(format!(
                "'{}' is not a message kind",
                other
            ))),
        }
    }
}

/// A flattened alert or heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub fields: BTreeMap<ObjectPath, Value>,
}

impl Message {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
        }
    }

    pub fn alert() -> Self {
        Self::new(MessageKind::Alert)
    }

    pub fn heartbeat() -> Self {
        Self::new(MessageKind::Heartbeat)
    }

    /// Set a field; the path must start at this message's root
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> DbResult<()> {
        let path: ObjectPath = path.parse()?;
        if path.root() != self.kind.root() {
            return Err(DbError::InvalidValue(format!(
                "path '{}' does not belong to a {}",
                path, self.kind
            )));
        }
        self.fields.insert(path, value.into());
        Ok(())
    }

    /// Builder form of [`Message::set`]
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> DbResult<Self> {
        self.set(path, value)?;
        Ok(self)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let path: ObjectPath = path.parse().ok()?;
        self.fields.get(&path)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
