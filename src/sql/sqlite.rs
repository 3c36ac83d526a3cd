//! SQLite backend
//!
//! Bundled through `rusqlite`. Time values are stored as
//! `YYYY-MM-DD HH:MM:SS` text, so calendar extraction goes through
//! `strftime()` and interval arithmetic through `datetime()` modifiers.
//! `REGEXP` is provided by a scalar function backed by the `regex` crate.

use crate::criteria::Operator;
use crate::error::{DbError, DbResult};
use crate::selection::{IntervalUnit, TimeConstraintType};
use crate::sql::backend::{SqlBackend, SqlPlugin, SqlSettings};
use crate::sql::dialect::{fold_case_constraint, to_hex, SqlDialect};
use crate::sql::table::{QueryOutcome, SqlField, SqlTable};
use regex::Regex;
use rusqlite::functions::{Aggregate, Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use std::sync::Arc;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// SQLite syntax
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// `datetime()` modifier unit and the factor converting `unit` into it
    fn modifier(unit: IntervalUnit) -> (i64, &'static str) {
        match unit {
            IntervalUnit::Year => (1, "years"),
            IntervalUnit::Quarter => (3, "months"),
            IntervalUnit::Month => (1, "months"),
            IntervalUnit::Week => (7, "days"),
            IntervalUnit::Day => (1, "days"),
            IntervalUnit::Hour => (1, "hours"),
            IntervalUnit::Min => (1, "minutes"),
            IntervalUnit::Sec => (1, "seconds"),
        }
    }
}

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn escape_binary(&self, input: &[u8]) -> String {
        format!("X'{}'", to_hex(input))
    }

    fn operator_string(&self, operator: Operator) -> Option<&'static str> {
        let op = match operator {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Lesser => "<",
            Operator::LesserOrEqual => "<=",
            Operator::Substr => "LIKE",
            Operator::NotSubstr => "NOT LIKE",
            Operator::Regex => "REGEXP",
            Operator::NotRegex => "NOT REGEXP",
            Operator::Null => "IS NULL",
            Operator::NotNull => "IS NOT NULL",
            _ => return None,
        };
        Some(op)
    }

    fn build_constraint(
        &self,
        field: &str,
        operator: Operator,
        value: Option<&str>,
    ) -> DbResult<String> {
        match operator {
            Operator::RegexNocase | Operator::NotRegexNocase => {
                let value = value.ok_or_else(|| {
                    DbError::InvalidValue(format!("operator '{}' requires a value", operator))
                })?;
                let op = if operator == Operator::RegexNocase {
                    "REGEXP"
                } else {
                    "NOT REGEXP"
                };
                Ok(format!("{} {} ('(?i)' || {})", field, op, value))
            }
            _ => fold_case_constraint(self, field, operator, value),
        }
    }

    fn build_time_extract(
        &self,
        field: &str,
        unit: TimeConstraintType,
        gmt_offset: i32,
    ) -> String {
        let source = if gmt_offset == 0 {
            field.to_string()
        } else {
            format!("datetime({}, '{:+} hours')", field, gmt_offset / 3600)
        };

        let format = match unit {
            TimeConstraintType::Quarter => {
                return format!("((CAST(strftime('%m', {}) AS INTEGER) + 2) / 3)", source)
            }
            TimeConstraintType::Msec => {
                return format!("CAST(strftime('%f', {}) * 1000 AS INTEGER)", source)
            }
            TimeConstraintType::Usec => {
                return format!("CAST(strftime('%f', {}) * 1000000 AS INTEGER)", source)
            }
            TimeConstraintType::Year => "%Y",
            TimeConstraintType::Month => "%m",
            TimeConstraintType::Yday => "%j",
            TimeConstraintType::Mday => "%d",
            TimeConstraintType::Wday => "%w",
            TimeConstraintType::Hour => "%H",
            TimeConstraintType::Min => "%M",
            TimeConstraintType::Sec => "%S",
        };

        format!("CAST(strftime('{}', {}) AS INTEGER)", format, source)
    }

    fn interval_multiply(&self, field: &str, amount: i64, unit: IntervalUnit) -> DbResult<String> {
        let (factor, modifier) = Self::modifier(unit);
        let amount = amount.checked_mul(factor).ok_or_else(|| {
            DbError::InvalidValue(format!("interval of {} {} is out of range", amount, unit))
        })?;
        Ok(format!("datetime({}, '{:+} {}')", field, amount, modifier))
    }

    /// The literal is an SQL expression evaluated by SQLite
    fn interval_add_literal(
        &self,
        field: &str,
        literal: &str,
        unit: IntervalUnit,
    ) -> DbResult<String> {
        let (factor, modifier) = Self::modifier(unit);
        let amount = match factor {
            1 => format!("({})", literal),
            factor => format!("({}) * {}", literal, factor),
        };
        Ok(format!("datetime({}, {} || ' {}')", field, amount, modifier))
    }

    fn build_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!(" LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!(" LIMIT {}", l),
            (None, Some(o)) => format!(" LIMIT -1 OFFSET {}", o),
            (None, None) => String::new(),
        }
    }
}

/// One SQLite connection
pub struct SqliteBackend {
    conn: Connection,
    dialect: SqliteDialect,
}

impl SqliteBackend {
    /// Open the database named by `settings.file` (or `settings.name`).
    ///
    /// `:memory:` opens a private in-memory database.
    pub fn open(settings: &SqlSettings) -> DbResult<Self> {
        let target = settings
            .file
            .as_deref()
            .or(settings.name.as_deref())
            .ok_or_else(|| DbError::Connection("no database file given".to_string()))?;

        let conn = if target == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open_with_flags(
                target,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        }
        .map_err(|e| DbError::Connection(format!("{}: {}", target, message(&e))))?;

        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Self::open(&SqlSettings::sqlite(":memory:"))
    }

    fn from_connection(conn: Connection) -> DbResult<Self> {
        register_regexp(&conn).map_err(|e| DbError::Connection(message(&e)))?;
        conn.create_aggregate_function(
            "stddev",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            StdDev,
        )
        .map_err(|e| DbError::Connection(message(&e)))?;

        conn.execute_batch("PRAGMA case_sensitive_like = ON;")
            .map_err(|e| DbError::Connection(message(&e)))?;

        Ok(Self {
            conn,
            dialect: SqliteDialect,
        })
    }
}

impl SqlBackend for SqliteBackend {
    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }

    fn query(&mut self, sql: &str) -> DbResult<QueryOutcome> {
        let mut stmt = self.conn.prepare(sql).map_err(query_error)?;

        if stmt.column_count() == 0 {
            stmt.execute([]).map_err(query_error)?;
            return Ok(QueryOutcome::NoRows);
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([]).map_err(query_error)?;
        let mut fetched = Vec::new();

        while let Some(row) = rows.next().map_err(query_error)? {
            let mut fields = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                fields.push(field_from(row.get_ref(i).map_err(query_error)?));
            }
            fetched.push(fields);
        }

        if fetched.is_empty() {
            return Ok(QueryOutcome::NoRows);
        }

        Ok(QueryOutcome::Table(SqlTable::new(columns, fetched)))
    }

    fn last_insert_ident(&mut self) -> DbResult<u64> {
        match self.conn.last_insert_rowid() {
            0 => Err(DbError::InvalidValue(
                "no identity value generated".to_string(),
            )),
            id => u64::try_from(id)
                .map_err(|_| DbError::InvalidValue(format!("invalid identity value {}", id))),
        }
    }

    fn server_version(&self) -> i64 {
        i64::from(rusqlite::version_number())
    }

    fn execute_script(&mut self, script: &str) -> DbResult<()> {
        self.conn.execute_batch(script).map_err(query_error)
    }
}

/// Registers [`SqliteBackend`] under the name `sqlite`
#[derive(Debug, Default)]
pub struct SqlitePlugin;

impl SqlPlugin for SqlitePlugin {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn open(&self, settings: &SqlSettings) -> DbResult<Box<dyn SqlBackend>> {
        Ok(Box::new(SqliteBackend::open(settings)?))
    }
}

/// `regexp(pattern, text)`, used by SQLite for `text REGEXP pattern`
fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let regex: Arc<Regex> = ctx.get_or_create_aux(0, |vr| -> Result<_, BoxError> {
                Ok(Regex::new(vr.as_str()?)?)
            })?;

            let matched = match ctx.get_raw(1) {
                ValueRef::Null => None,
                ValueRef::Text(text) => Some(regex.is_match(&String::from_utf8_lossy(text))),
                ValueRef::Integer(i) => Some(regex.is_match(&i.to_string())),
                ValueRef::Real(f) => Some(regex.is_match(&f.to_string())),
                ValueRef::Blob(_) => Some(false),
            };
            Ok(matched)
        },
    )
}

/// Running mean and squared deviation (Welford)
#[derive(Debug, Default)]
struct Deviation {
    count: u64,
    mean: f64,
    m2: f64,
}

/// Sample standard deviation, NULL below two values
struct StdDev;

impl Aggregate<Deviation, Option<f64>> for StdDev {
    fn init(&self, _: &mut Context<'_>) -> rusqlite::Result<Deviation> {
        Ok(Deviation::default())
    }

    fn step(&self, ctx: &mut Context<'_>, acc: &mut Deviation) -> rusqlite::Result<()> {
        if let Some(x) = ctx.get::<Option<f64>>(0)? {
            acc.count += 1;
            let delta = x - acc.mean;
            acc.mean += delta / acc.count as f64;
            acc.m2 += delta * (x - acc.mean);
        }
        Ok(())
    }

    fn finalize(
        &self,
        _: &mut Context<'_>,
        acc: Option<Deviation>,
    ) -> rusqlite::Result<Option<f64>> {
        Ok(acc
            .filter(|d| d.count > 1)
            .map(|d| (d.m2 / (d.count - 1) as f64).sqrt()))
    }
}

fn field_from(value: ValueRef<'_>) -> SqlField {
    match value {
        ValueRef::Null => SqlField::null(),
        ValueRef::Integer(i) => SqlField::new(i.to_string()),
        ValueRef::Real(f) => SqlField::new(f.to_string()),
        ValueRef::Text(t) => SqlField::new(t),
        ValueRef::Blob(b) => SqlField::new(format!("\\x{}", to_hex(b))),
    }
}

/// Native error text without trailing whitespace
fn message(e: &rusqlite::Error) -> String {
    e.to_string().trim_end().to_string()
}

fn query_error(e: rusqlite::Error) -> DbError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::CannotOpen | ErrorCode::NotADatabase) =>
        {
            DbError::ConnectionLost(message(&e))
        }
        _ => DbError::Query(message(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SqliteBackend {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_script(
                "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, data BLOB, created TEXT);
                 INSERT INTO t (name, data, created) VALUES ('Alpha', X'00ff', '2024-03-03 10:15:30');
                 INSERT INTO t (name, data, created) VALUES ('', NULL, '2024-07-01 23:00:00');",
            )
            .unwrap();
        backend
    }

    fn single(backend: &mut SqliteBackend, sql: &str) -> SqlField {
        let table = backend.query(sql).unwrap().into_table().unwrap();
        table.field(0, 0).unwrap().clone()
    }

    #[test]
    fn test_query_outcomes() {
        let mut backend = backend();

        let table = backend.query("SELECT id, name FROM t ORDER BY id").unwrap().into_table().unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column_name(1).unwrap(), "name");
        assert_eq!(table.field(0, 1).unwrap().as_str(), Some("Alpha"));
        assert_eq!(table.field(1, 1).unwrap().as_str(), Some(""));

        assert_eq!(backend.query("SELECT id FROM t WHERE id = 99").unwrap(), QueryOutcome::NoRows);
        assert_eq!(backend.query("UPDATE t SET name = 'b' WHERE id = 2").unwrap(), QueryOutcome::NoRows);
    }

    #[test]
    fn test_query_error_is_trimmed() {
        let mut backend = backend();
        match backend.query("SELECT * FROM missing_table") {
            Err(DbError::Query(msg)) => {
                assert!(msg.contains("missing_table"));
                assert_eq!(msg, msg.trim_end());
            }
            other => panic!("expected query error, got {:?}", other),
        }
    }

    #[test]
    fn test_last_insert_ident() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        assert!(backend.last_insert_ident().is_err());

        backend.execute_script("CREATE TABLE x (id INTEGER PRIMARY KEY, v TEXT);").unwrap();
        backend.query("INSERT INTO x (v) VALUES ('a')").unwrap();
        backend.query("INSERT INTO x (v) VALUES ('b')").unwrap();
        assert_eq!(backend.last_insert_ident().unwrap(), 2);
    }

    #[test]
    fn test_binary_roundtrip() {
        let mut backend = backend();
        let field = single(&mut backend, "SELECT data FROM t WHERE id = 1");
        assert_eq!(field.as_str(), Some("\\x00ff"));
        assert_eq!(backend.dialect().unescape_binary(field.as_str().unwrap()).unwrap(), vec![0, 255]);

        let literal = backend.dialect().escape_binary(&[1, 2, 3]);
        let field = single(&mut backend, &format!("SELECT {}", literal));
        assert_eq!(backend.dialect().unescape_binary(field.as_str().unwrap()).unwrap(), vec![1, 2, 3]);

        let field = single(&mut backend, "SELECT data FROM t WHERE id = 2");
        assert!(field.is_null());
    }

    #[test]
    fn test_regexp_function() {
        let mut backend = backend();
        let dialect = SqliteDialect;

        let clause = dialect.build_constraint("name", Operator::Regex, Some("'^Al'")).unwrap();
        let field = single(&mut backend, &format!("SELECT COUNT(*) FROM t WHERE {}", clause));
        assert_eq!(field.parse::<i64>().unwrap(), 1);

        let clause = dialect.build_constraint("name", Operator::RegexNocase, Some("'^al'")).unwrap();
        let field = single(&mut backend, &format!("SELECT COUNT(*) FROM t WHERE {}", clause));
        assert_eq!(field.parse::<i64>().unwrap(), 1);

        let clause = dialect.build_constraint("name", Operator::Regex, Some("'^al'")).unwrap();
        let field = single(&mut backend, &format!("SELECT COUNT(*) FROM t WHERE {}", clause));
        assert_eq!(field.parse::<i64>().unwrap(), 0);
    }

    #[test]
    fn test_like_is_case_sensitive() {
        let mut backend = backend();
        let dialect = SqliteDialect;

        let clause = dialect.build_constraint("name", Operator::Substr, Some("'%alp%'")).unwrap();
        let field = single(&mut backend, &format!("SELECT COUNT(*) FROM t WHERE {}", clause));
        assert_eq!(field.parse::<i64>().unwrap(), 0);

        let clause = dialect
            .build_constraint("name", Operator::SubstrNocase, Some("'%alp%'"))
            .unwrap();
        assert_eq!(clause, "lower(name) LIKE lower('%alp%')");
        let field = single(&mut backend, &format!("SELECT COUNT(*) FROM t WHERE {}", clause));
        assert_eq!(field.parse::<i64>().unwrap(), 1);
    }

    #[test]
    fn test_time_extract_executes() {
        let mut backend = backend();
        let dialect = SqliteDialect;

        let cases = [
            (TimeConstraintType::Year, 0, 2024),
            (TimeConstraintType::Quarter, 0, 1),
            (TimeConstraintType::Month, 0, 3),
            (TimeConstraintType::Mday, 0, 3),
            (TimeConstraintType::Yday, 0, 63),
            (TimeConstraintType::Wday, 0, 0),
            (TimeConstraintType::Hour, 0, 10),
            (TimeConstraintType::Hour, 7200, 12),
            (TimeConstraintType::Min, 0, 15),
            (TimeConstraintType::Sec, 0, 30),
            (TimeConstraintType::Msec, 0, 30000),
        ];

        for (unit, offset, expected) in cases {
            let expr = dialect.build_time_extract("created", unit, offset);
            let field = single(&mut backend, &format!("SELECT {} FROM t WHERE id = 1", expr));
            assert_eq!(field.parse::<i64>().unwrap(), expected, "{:?}", unit);
        }
    }

    #[test]
    fn test_time_interval_executes() {
        let mut backend = backend();
        let dialect = SqliteDialect;

        let expr = dialect.build_time_interval("created", "3", IntervalUnit::Day).unwrap();
        assert_eq!(expr, "datetime(created, '+3 days')");
        let field = single(&mut backend, &format!("SELECT {} FROM t WHERE id = 1", expr));
        assert_eq!(field.as_str(), Some("2024-03-06 10:15:30"));

        let expr = dialect
            .build_time_interval("created", "-1", IntervalUnit::Quarter)
            .unwrap();
        let field = single(&mut backend, &format!("SELECT {} FROM t WHERE id = 1", expr));
        assert_eq!(field.as_str(), Some("2023-12-03 10:15:30"));

        let expr = dialect
            .build_time_interval("created", "1 + 1", IntervalUnit::Hour)
            .unwrap();
        assert_eq!(expr, "datetime(created, (1 + 1) || ' hours')");
        let field = single(&mut backend, &format!("SELECT {} FROM t WHERE id = 1", expr));
        assert_eq!(field.as_str(), Some("2024-03-03 12:15:30"));
    }

    #[test]
    fn test_time_interval_overflow() {
        let dialect = SqliteDialect;
        let max = i64::MAX.to_string();

        assert!(matches!(
            dialect.build_time_interval("created", &max, IntervalUnit::Quarter),
            Err(DbError::InvalidValue(_))
        ));
        assert!(matches!(
            dialect.build_time_interval("created", &i64::MIN.to_string(), IntervalUnit::Week),
            Err(DbError::InvalidValue(_))
        ));
        assert_eq!(
            dialect.build_time_interval("created", &max, IntervalUnit::Day).unwrap(),
            format!("datetime(created, '+{} days')", max)
        );
    }

    #[test]
    fn test_stddev_aggregate() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_script(
                "CREATE TABLE n (v INTEGER);
                 INSERT INTO n VALUES (2), (4), (4), (4), (5), (5), (7), (9), (NULL);",
            )
            .unwrap();

        let value: f64 = single(&mut backend, "SELECT STDDEV(v) FROM n").parse().unwrap();
        assert!((value - 2.138089935).abs() < 1e-6);

        let field = single(&mut backend, "SELECT STDDEV(v) FROM n WHERE v = 2");
        assert!(field.is_null());
    }

    #[test]
    fn test_limit_offset() {
        let dialect = SqliteDialect;
        assert_eq!(dialect.build_limit_offset(Some(5), Some(10)), " LIMIT 5 OFFSET 10");
        assert_eq!(dialect.build_limit_offset(Some(5), None), " LIMIT 5");
        assert_eq!(dialect.build_limit_offset(None, Some(10)), " LIMIT -1 OFFSET 10");
        assert_eq!(dialect.build_limit_offset(None, None), "");
    }

    #[test]
    fn test_open_requires_target() {
        let settings = SqlSettings::default();
        assert!(matches!(SqliteBackend::open(&settings), Err(DbError::Connection(_))));
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let settings = SqlSettings::sqlite(path.to_str().unwrap());

        let mut backend = SqlitePlugin.open(&settings).unwrap();
        backend.execute_script("CREATE TABLE a (x INTEGER);").unwrap();
        assert!(path.exists());
        assert!(backend.server_version() >= 3_000_000);
    }
}
