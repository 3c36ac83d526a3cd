//! Schema Mapping Index
//!
//! Resolves an abstract [`ObjectPath`] to the table, column (or SQL function)
//! and join metadata that implement it in a concrete relational schema.
//!
//! # Mapping file format
//!
//! ```text
//! # comment
//! object=alert.create_time table=Prelude_CreateTime field=time usec_field=usec gmtoff_field=gmtoff
//! object=alert.classification.text table=Prelude_Classification field=text
//! object=alert.analyzer.name table=Prelude_Analyzer field=name condition="Prelude_Analyzer._index = -1"
//! ```
//!
//! The index is built once, sorted by path, and never mutated afterwards;
//! lookups are a binary search.

pub(crate) mod parser;

use crate::error::{DbError, DbResult, MappingError};
use crate::path::ObjectPath;
use std::path::Path;
use std::str::FromStr;

/// How a mapped object is read from its table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedColumn {
    /// Plain column of `table`
    Field(String),
    /// SQL expression computed from the table
    Function(String),
}

/// One line of the mapping file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    object: ObjectPath,
    table: String,
    column: MappedColumn,
    top_table: Option<String>,
    top_field: Option<String>,
    condition: Option<String>,
    ident_field: Option<String>,
    usec_field: Option<String>,
    gmtoff_field: Option<String>,
}

impl MappingEntry {
    pub fn object(&self) -> &ObjectPath {
        &self.object
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> &MappedColumn {
        &self.column
    }

    pub fn field(&self) -> Option<&str> {
        match &self.column {
            MappedColumn::Field(f) => Some(f),
            MappedColumn::Function(_) => None,
        }
    }

    pub fn function(&self) -> Option<&str> {
        match &self.column {
            MappedColumn::Function(f) => Some(f),
            MappedColumn::Field(_) => None,
        }
    }

    pub fn top_table(&self) -> Option<&str> {
        self.top_table.as_deref()
    }

    pub fn top_field(&self) -> Option<&str> {
        self.top_field.as_deref()
    }

    /// Extra predicate restricting the rows of `table` that hold this object
    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    pub fn ident_field(&self) -> Option<&str> {
        self.ident_field.as_deref()
    }

    pub fn usec_field(&self) -> Option<&str> {
        self.usec_field.as_deref()
    }

    pub fn gmtoff_field(&self) -> Option<&str> {
        self.gmtoff_field.as_deref()
    }

    /// Whether the object is an IDMEF time split over several columns
    pub fn is_time(&self) -> bool {
        self.usec_field.is_some() || self.gmtoff_field.is_some()
    }

    /// SQL expression reading the object: `table.field` or the function text
    pub fn sql_expression(&self) -> String {
        match &self.column {
            MappedColumn::Field(f) => format!("{}.{}", self.table, f),
            MappedColumn::Function(f) => f.clone(),
        }
    }

    /// Parse one record. `line` is only used for error reporting.
    fn parse(record: &str, line: usize) -> Result<Self, MappingError> {
        let parse_error = |reason: String| MappingError::Parse { line, reason };

        let mut object = None;
        let mut table = None;
        let mut field = None;
        let mut function = None;
        let mut top_table = None;
        let mut top_field = None;
        let mut condition = None;
        let mut ident_field = None;
        let mut usec_field = None;
        let mut gmtoff_field = None;

        for token in parser::split_tokens(record).map_err(parse_error)? {
            let (key, value) = parser::split_pair(token).map_err(parse_error)?;

            let slot = match key.as_str() {
                "object" => &mut object,
                "table" => &mut table,
                "field" => &mut field,
                "function" => &mut function,
                "top_table" => &mut top_table,
                "top_field" => &mut top_field,
                "condition" => &mut condition,
                "ident_field" => &mut ident_field,
                "usec_field" => &mut usec_field,
                "gmtoff_field" => &mut gmtoff_field,
                _ => return Err(parse_error(format!("unknown key '{}'", key))),
            };

            if slot.replace(value).is_some() {
                return Err(parse_error(format!("key '{}' given twice", key)));
            }
        }

        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());

        let object = non_empty(object).ok_or_else(|| parse_error("missing 'object'".into()))?;
        let object = ObjectPath::from_str(&object)
            .map_err(|_| parse_error(format!("invalid object path '{}'", object)))?;
        if object.has_indexes() {
            return Err(parse_error(format!("object '{}' must not carry list indexes", object)));
        }

        let table = non_empty(table).ok_or_else(|| parse_error("missing 'table'".into()))?;

        let column = match (non_empty(field), non_empty(function)) {
            (Some(f), None) => MappedColumn::Field(f),
            (None, Some(f)) => MappedColumn::Function(f),
            (None, None) => return Err(parse_error("missing 'field' or 'function'".into())),
            (Some(_), Some(_)) => {
                return Err(parse_error("'field' and 'function' are exclusive".into()))
            }
        };

        Ok(Self {
            object,
            table,
            column,
            top_table: non_empty(top_table),
            top_field: non_empty(top_field),
            condition: non_empty(condition),
            ident_field: non_empty(ident_field),
            usec_field: non_empty(usec_field),
            gmtoff_field: non_empty(gmtoff_field),
        })
    }
}

/// Immutable, path-sorted set of mapping entries
#[derive(Debug, Clone, Default)]
pub struct MappingIndex {
    entries: Vec<MappingEntry>,
}

impl MappingIndex {
    /// Load a mapping file from disk
    pub fn load(path: &Path) -> Result<Self, MappingError> {
        let content = std::fs::read_to_string(path).map_err(|source| MappingError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let index = Self::parse_str(&content)?;
        tracing::debug!("{} objects loaded and indexed from {:?}", index.len(), path);
        Ok(index)
    }

    /// Build an index from mapping text
    pub fn parse_str(content: &str) -> Result<Self, MappingError> {
        let mut parsed: Vec<(MappingEntry, usize)> = Vec::new();

        for (i, raw) in content.lines().enumerate() {
            let line = i + 1;
            let record = raw.trim();

            if record.is_empty() || record.starts_with('#') {
                continue;
            }

            parsed.push((MappingEntry::parse(record, line)?, line));
        }

        // Stable sort keeps declaration order among equal paths, so the
        // later of two duplicates is reported.
        parsed.sort_by(|(a, _), (b, _)| a.object.cmp(&b.object));

        for pair in parsed.windows(2) {
            let (first, first_line) = &pair[0];
            let (second, second_line) = &pair[1];
            if first.object == second.object {
                return Err(MappingError::Duplicate {
                    line: (*first_line).max(*second_line),
                    object: second.object.to_string(),
                });
            }
        }

        Ok(Self {
            entries: parsed.into_iter().map(|(entry, _)| entry).collect(),
        })
    }

    /// Exact lookup, O(log n)
    pub fn lookup(&self, path: &ObjectPath) -> Option<&MappingEntry> {
        self.entries
            .binary_search_by(|entry| entry.object.cmp(path))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Lookup ignoring list indexes, failing with [`DbError::UnmappedPath`]
    pub fn resolve(&self, path: &ObjectPath) -> DbResult<&MappingEntry> {
        let found = if path.has_indexes() {
            self.lookup(&path.normalized())
        } else {
            self.lookup(path)
        };
        found.ok_or_else(|| DbError::UnmappedPath(path.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in path order
    pub fn iter(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.iter()
    }

    /// Entries whose path starts at `root` (e.g. every `alert.*` object)
    pub fn entries_under<'a>(&'a self, root: &'a str) -> impl Iterator<Item = &'a MappingEntry> {
        self.entries
            .iter()
            .filter(move |e| e.object.root() == root && e.object.depth() > 1)
    }
}

impl FromStr for MappingIndex {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}
