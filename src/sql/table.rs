//! Materialized query results

use crate::error::{DbError, DbResult};
use std::str::FromStr;

/// One cell of a result row.
///
/// `None` is SQL NULL; `Some(vec![])` is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SqlField {
    value: Option<Vec<u8>>,
}

impl SqlField {
    pub fn null() -> Self {
        Self { value: None }
    }

    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: Some(value.into()),
        }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Byte length; zero for NULL
    pub fn len(&self) -> usize {
        self.value.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Text content, `None` for NULL or non UTF-8 data
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_deref().and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Parse the text content
    pub fn parse<T: FromStr>(&self) -> DbResult<T> {
        let text = self
            .as_str()
            .ok_or_else(|| DbError::InvalidValue("cannot parse a NULL field".to_string()))?;
        text.trim()
            .parse()
            .map_err(|_| DbError::InvalidValue(format!("could not parse field value '{}'", text)))
    }
}

impl From<Option<String>> for SqlField {
    fn from(value: Option<String>) -> Self {
        Self {
            value: value.map(String::into_bytes),
        }
    }
}

/// Outcome of a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Statement succeeded without producing rows
    NoRows,
    Table(SqlTable),
}

impl QueryOutcome {
    pub fn into_table(self) -> Option<SqlTable> {
        match self {
            Self::NoRows => None,
            Self::Table(t) => Some(t),
        }
    }
}

/// Column names plus every fetched row
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SqlTable {
    columns: Vec<String>,
    rows: Vec<Vec<SqlField>>,
}

impl SqlTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlField>>) -> Self {
        Self { columns, rows }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_name(&self, index: usize) -> DbResult<&str> {
        self.columns
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| DbError::InvalidColumn(format!("no column at index {}", index)))
    }

    /// Index of a column by name
    pub fn column_num(&self, name: &str) -> DbResult<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DbError::InvalidColumn(format!("no column named '{}'", name)))
    }

    pub fn row(&self, index: usize) -> Option<&[SqlField]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[SqlField]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub fn into_rows(self) -> Vec<Vec<SqlField>> {
        self.rows
    }

    /// Field at `(row, column)`
    pub fn field(&self, row: usize, column: usize) -> DbResult<&SqlField> {
        let fields = self
            .rows
            .get(row)
            .ok_or_else(|| DbError::InvalidValue(format!("no row at index {}", row)))?;
        fields
            .get(column)
            .ok_or_else(|| DbError::InvalidColumn(format!("no column at index {}", column)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SqlTable {
        SqlTable::new(
            vec!["_ident".into(), "messageid".into()],
            vec![
                vec![SqlField::new("1"), SqlField::new("")],
                vec![SqlField::new("2"), SqlField::null()],
            ],
        )
    }

    #[test]
    fn test_null_and_empty_differ() {
        let table = sample();
        let empty = table.field(0, 1).unwrap();
        let null = table.field(1, 1).unwrap();

        assert!(!empty.is_null());
        assert_eq!(empty.len(), 0);
        assert_eq!(empty.as_str(), Some(""));

        assert!(null.is_null());
        assert_eq!(null.len(), 0);
        assert_eq!(null.as_str(), None);
    }

    #[test]
    fn test_columns() {
        let table = sample();
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.column_num("messageid").unwrap(), 1);
        assert_eq!(table.column_name(0).unwrap(), "_ident");
        assert!(matches!(table.column_num("nope"), Err(DbError::InvalidColumn(_))));
        assert!(table.column_name(5).is_err());
    }

    #[test]
    fn test_typed_parse() {
        let table = sample();
        assert_eq!(table.field(1, 0).unwrap().parse::<u64>().unwrap(), 2);
        assert!(table.field(1, 1).unwrap().parse::<u64>().is_err());
        assert!(SqlField::new("abc").parse::<i64>().is_err());
    }
}
