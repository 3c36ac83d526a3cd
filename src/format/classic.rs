//! The `classic` format
//!
//! Every storage decision comes from the [`MappingIndex`]:
//!
//! - the root object of a kind (`alert`, `heartbeat`) names the message
//!   table and its identity column
//! - every other table holds at most one row per message and carries the
//!   message ident in its `ident_field` (`_message_ident` by default)
//! - time objects span three columns: UTC timestamp, microseconds and GMT
//!   offset in seconds
//!
//! Queries start from the message table and `LEFT JOIN` the tables the
//! criteria and selection touch.

use crate::criteria::{CriteriaCompiler, Criteria};
use crate::error::{DbError, DbResult};
use crate::format::{Assignment, FormatPlugin, IdentsOrder, ValuesQuery, Window};
use crate::mapping::{MappingEntry, MappingIndex};
use crate::path::ObjectPath;
use crate::result::{IdentsResource, Row, ValuesResource};
use crate::selection::{PathSelection, SelectedPath, SelectionFlags};
use crate::sql::{Sql, SqlDialect, SqlField, SqlTable};
use crate::value::{sql_timestamp, time_from_parts, Message, MessageKind, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

const DEFAULT_MAPPING: &str = include_str!("../../data/classic.map");
const SQLITE_SCHEMA: &str = include_str!("../../data/classic-sqlite.sql");

const SCHEMA_VERSION: &str = "14.8";
const MINIMUM_VERSION: (u32, u32) = (14, 7);
const DEFAULT_IDENT_FIELD: &str = "_message_ident";

const INTEGER_OBJECTS: &[&str] = &[
    "heartbeat.heartbeat_interval",
    "alert.source.service.port",
    "alert.target.service.port",
];
const FLOAT_OBJECTS: &[&str] = &["alert.assessment.confidence.confidence"];
const BINARY_OBJECTS: &[&str] = &["alert.additional_data.data"];

/// How an object's column content is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Text,
    Integer,
    Float,
    Binary,
    Time,
}

impl Storage {
    fn of(entry: &MappingEntry) -> Self {
        if entry.is_time() {
            return Self::Time;
        }
        let object = entry.object().to_string();
        if INTEGER_OBJECTS.contains(&object.as_str()) {
            Self::Integer
        } else if FLOAT_OBJECTS.contains(&object.as_str()) {
            Self::Float
        } else if BINARY_OBJECTS.contains(&object.as_str()) {
            Self::Binary
        } else {
            Self::Text
        }
    }
}

/// Decoding of one values query column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Float,
    /// Integer when it parses as one, float otherwise
    Number,
    Stored(Storage),
}

impl ColumnKind {
    fn of(selected: &SelectedPath, entry: &MappingEntry) -> Self {
        match selected.flags.aggregate() {
            Some(f) if f == SelectionFlags::COUNT => return Self::Integer,
            Some(f) if f == SelectionFlags::AVG || f == SelectionFlags::STD => return Self::Float,
            Some(f) if f == SelectionFlags::SUM => return Self::Number,
            _ => {}
        }
        if selected.time_constraint.is_some() {
            return Self::Number;
        }
        Self::Stored(Storage::of(entry))
    }
}

/// Message table and identity column of one kind
#[derive(Debug, Clone, Copy)]
struct MessageTable<'a> {
    table: &'a str,
    ident: &'a str,
}

/// Pending column values of one table row
#[derive(Debug, Default)]
struct TableRow<'a> {
    ident_field: &'a str,
    columns: Vec<(String, String)>,
}

/// Mapping-driven storage of IDMEF messages
#[derive(Debug, Clone)]
pub struct ClassicFormat {
    mapping: MappingIndex,
}

impl ClassicFormat {
    pub fn new(mapping: MappingIndex) -> Self {
        Self { mapping }
    }

    /// Format using the embedded `classic.map`
    pub fn with_default_mapping() -> DbResult<Self> {
        Ok(Self::new(MappingIndex::parse_str(DEFAULT_MAPPING)?))
    }

    pub fn from_mapping_file(path: &Path) -> DbResult<Self> {
        Ok(Self::new(MappingIndex::load(path)?))
    }

    fn message_table(&self, root: &str) -> DbResult<MessageTable<'_>> {
        let entry = self.mapping.resolve(&ObjectPath::new(root)?)?;
        let ident = entry.field().ok_or_else(|| {
            DbError::InvalidValue(format!("root object '{}' must map to a field", root))
        })?;
        Ok(MessageTable {
            table: entry.table(),
            ident,
        })
    }

    /// `table LEFT JOIN ...` covering every table in `entries`
    fn from_clause(&self, root: MessageTable<'_>, entries: &[&MappingEntry]) -> String {
        let mut clause = root.table.to_string();
        let mut joined = BTreeSet::new();

        for entry in entries {
            let table = entry.table();
            if table == root.table || !joined.insert(table) {
                continue;
            }
            clause.push_str(&format!(
                " LEFT JOIN {t} ON {t}.{c} = {r}.{i}",
                t = table,
                c = ident_field(entry),
                r = root.table,
                i = root.ident
            ));
        }

        clause
    }

    /// Column assignments for storing `value` (NULL when `None`) in `entry`
    fn columns(
        &self,
        dialect: &dyn SqlDialect,
        entry: &MappingEntry,
        value: Option<&Value>,
    ) -> DbResult<Vec<(String, String)>> {
        let field = entry.field().ok_or_else(|| {
            DbError::NotSupported(format!("{} is computed, it cannot be stored", entry.object()))
        })?;

        let mut columns = Vec::with_capacity(3);
        match (Storage::of(entry), value) {
            (_, None) => {
                columns.push((field.to_string(), "NULL".to_string()));
                columns.extend(time_parts(entry).map(|c| (c.to_string(), "NULL".to_string())));
            }
            (Storage::Time, Some(Value::Time(t))) => {
                columns.push((field.to_string(), dialect.escape(&sql_timestamp(t))?));
                if let Some(usec) = entry.usec_field() {
                    columns.push((usec.to_string(), t.timestamp_subsec_micros().to_string()));
                }
                if let Some(gmtoff) = entry.gmtoff_field() {
                    columns.push((gmtoff.to_string(), t.offset().local_minus_utc().to_string()));
                }
            }
            (Storage::Time, Some(other)) => {
                return Err(DbError::InvalidValue(format!(
                    "{} expects a time, got {}",
                    entry.object(),
                    other.type_name()
                )))
            }
            (_, Some(value)) => columns.push((field.to_string(), literal(dialect, value)?)),
        }

        Ok(columns)
    }

    /// Group `(path, value)` pairs by table
    fn table_rows<'a>(
        &'a self,
        dialect: &dyn SqlDialect,
        root: &str,
        values: impl Iterator<Item = (&'a ObjectPath, Option<&'a Value>)>,
    ) -> DbResult<BTreeMap<&'a str, TableRow<'a>>> {
        let mut rows: BTreeMap<&str, TableRow<'_>> = BTreeMap::new();

        for (path, value) in values {
            if path.root() != root {
                return Err(DbError::InvalidValue(format!(
                    "path '{}' does not belong to a {}",
                    path, root
                )));
            }
            if path.has_indexes() {
                return Err(DbError::NotSupported(format!(
                    "list element '{}' in the classic format",
                    path
                )));
            }

            let entry = self.mapping.resolve(path)?;
            if entry.object().depth() == 1 {
                return Err(DbError::InvalidValue(format!(
                    "'{}' is assigned by the database",
                    path
                )));
            }

            let row = rows.entry(entry.table()).or_insert_with(|| TableRow {
                ident_field: ident_field(entry),
                columns: Vec::new(),
            });
            row.columns.extend(self.columns(dialect, entry, value)?);
        }

        Ok(rows)
    }

    fn existing_idents(
        &self,
        sql: &mut Sql,
        table: &str,
        column: &str,
        idents: &[u64],
    ) -> DbResult<Vec<u64>> {
        let query = format!(
            "SELECT {c} FROM {t} WHERE {c} IN ({list})",
            c = column,
            t = table,
            list = ident_list(idents)
        );

        match sql.query_table(&query)? {
            Some(table) => table
                .rows()
                .map(|row| parse_field::<u64>(&row[0]))
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Tables holding parts of a `root` message other than the message table
    fn child_tables(&self, root: MessageTable<'_>, kind: MessageKind) -> Vec<(&str, &str)> {
        let mut tables: Vec<(&str, &str)> = Vec::new();
        for entry in self.mapping.entries_under(kind.root()) {
            if entry.table() != root.table && !tables.iter().any(|(t, _)| *t == entry.table()) {
                tables.push((entry.table(), ident_field(entry)));
            }
        }
        tables
    }
}

impl FormatPlugin for ClassicFormat {
    fn name(&self) -> &'static str {
        "classic"
    }

    fn schema_version(&self) -> &'static str {
        SCHEMA_VERSION
    }

    fn check_schema_version(&self, version: &str) -> DbResult<()> {
        let parsed = version
            .trim()
            .split_once('.')
            .and_then(|(major, minor)| Some((major.parse::<u32>().ok()?, minor.parse::<u32>().ok()?)));

        match parsed {
            Some((major, minor)) if major == MINIMUM_VERSION.0 && minor >= MINIMUM_VERSION.1 => {
                Ok(())
            }
            _ => Err(DbError::IncompatibleVersion {
                format: self.name().to_string(),
                version: version.to_string(),
            }),
        }
    }

    fn mapping(&self) -> &MappingIndex {
        &self.mapping
    }

    fn install_schema(&self, sql: &mut Sql) -> DbResult<()> {
        if sql.dialect().name() != "sqlite" {
            return Err(DbError::NotSupported(format!(
                "no classic schema for the {} backend",
                sql.dialect().name()
            )));
        }
        debug!("installing classic schema {}", SCHEMA_VERSION);
        sql.execute_script(SQLITE_SCHEMA)
    }

    fn insert_message(&self, sql: &mut Sql, message: &Message) -> DbResult<u64> {
        let root = self.message_table(message.kind.root())?;
        let mut rows = self.table_rows(
            sql.dialect(),
            message.kind.root(),
            message.fields.iter().map(|(p, v)| (p, Some(v))),
        )?;
        let root_row = rows.remove(root.table).unwrap_or_default();

        sql.internal_transaction(|sql| {
            sql.execute(&insert_statement(root.table, &root_row.columns))?;
            let ident = sql.last_insert_ident()?;

            for (table, mut row) in rows {
                row.columns
                    .insert(0, (row.ident_field.to_string(), ident.to_string()));
                sql.execute(&insert_statement(table, &row.columns))?;
            }

            Ok(ident)
        })
    }

    fn get_idents(
        &self,
        sql: &mut Sql,
        kind: MessageKind,
        criteria: Option<&Criteria>,
        window: Window,
        order: IdentsOrder,
    ) -> DbResult<Option<Box<dyn IdentsResource>>> {
        let root = self.message_table(kind.root())?;
        let compiler = CriteriaCompiler::new(&self.mapping, sql.dialect());

        let compiled = criteria.map(|c| compiler.compile(c)).transpose()?;
        let mut entries = compiled
            .as_ref()
            .map(|c| c.entries.clone())
            .unwrap_or_default();
        ensure_root(entries.iter().map(|e| e.object()), kind.root())?;

        let mut query = format!("SELECT DISTINCT {}.{}", root.table, root.ident);

        let ordering = match order {
            IdentsOrder::None => None,
            IdentsOrder::CreateTimeAsc => Some("ASC"),
            IdentsOrder::CreateTimeDesc => Some("DESC"),
        };
        let ordering = match ordering {
            Some(direction) => {
                let create_time = self
                    .mapping
                    .resolve(&ObjectPath::new(kind.root())?.child("create_time")?)?;
                let expr = create_time.sql_expression();
                query.push_str(&format!(", {}", expr));
                entries.push(create_time);
                Some(format!(" ORDER BY {} {}", expr, direction))
            }
            None => None,
        };

        query.push_str(" FROM ");
        query.push_str(&self.from_clause(root, &entries));
        if let Some(compiled) = &compiled {
            query.push_str(&format!(" WHERE {}", compiled.sql));
        }
        query.push_str(ordering.as_deref().unwrap_or_default());
        query.push_str(&sql.dialect().build_limit_offset(window.limit, window.offset));

        Ok(sql
            .query_table(&query)?
            .map(|table| Box::new(TableIdents::new(table)) as Box<dyn IdentsResource>))
    }

    fn get_message(
        &self,
        sql: &mut Sql,
        kind: MessageKind,
        ident: u64,
    ) -> DbResult<Option<Message>> {
        let root = self.message_table(kind.root())?;
        if self
            .existing_idents(sql, root.table, root.ident, &[ident])?
            .is_empty()
        {
            return Ok(None);
        }

        let mut by_table: BTreeMap<&str, Vec<&MappingEntry>> = BTreeMap::new();
        for entry in self.mapping.entries_under(kind.root()) {
            if entry.field().is_some() {
                by_table.entry(entry.table()).or_default().push(entry);
            }
        }

        let mut message = Message::new(kind);
        for (table, entries) in by_table {
            let key = if table == root.table {
                root.ident
            } else {
                ident_field(entries[0])
            };

            let columns: Vec<&str> = entries
                .iter()
                .flat_map(|e| e.field().into_iter().chain(time_parts(e)))
                .collect();

            let query = format!(
                "SELECT {} FROM {t} WHERE {t}.{k} = {i}",
                columns.join(", "),
                t = table,
                k = key,
                i = ident
            );

            let Some(result) = sql.query_table(&query)? else {
                continue;
            };
            let Some(row) = result.row(0) else {
                continue;
            };

            let mut offset = 0;
            for entry in entries {
                let (value, used) = read_object(sql.dialect(), entry, &row[offset..])?;
                offset += used;
                if let Some(value) = value {
                    message.fields.insert(entry.object().clone(), value);
                }
            }
        }

        Ok(Some(message))
    }

    fn delete_messages(&self, sql: &mut Sql, kind: MessageKind, idents: &[u64]) -> DbResult<usize> {
        if idents.is_empty() {
            return Ok(0);
        }

        let root = self.message_table(kind.root())?;
        let existing = self.existing_idents(sql, root.table, root.ident, idents)?;
        if existing.is_empty() {
            return Ok(0);
        }

        let list = ident_list(&existing);
        let tables = self.child_tables(root, kind);

        sql.internal_transaction(|sql| {
            for (table, column) in tables {
                sql.execute(&format!("DELETE FROM {} WHERE {} IN ({})", table, column, list))?;
            }
            sql.execute(&format!(
                "DELETE FROM {} WHERE {} IN ({})",
                root.table, root.ident, list
            ))?;
            Ok(existing.len())
        })
    }

    fn get_values(
        &self,
        sql: &mut Sql,
        selection: &PathSelection,
        criteria: Option<&Criteria>,
        query: ValuesQuery,
    ) -> DbResult<Option<Box<dyn ValuesResource>>> {
        let first = selection
            .get(0)
            .ok_or_else(|| DbError::InvalidValue("empty selection".to_string()))?;
        let root_name = first.path.root().to_string();
        let root = self.message_table(&root_name)?;

        let compiler = CriteriaCompiler::new(&self.mapping, sql.dialect());
        let columns = selection
            .iter()
            .map(|s| compiler.compile_selected(s))
            .collect::<DbResult<Vec<_>>>()?;
        let compiled = criteria.map(|c| compiler.compile(c)).transpose()?;

        let mut entries: Vec<&MappingEntry> = columns.iter().map(|c| c.entry).collect();
        if let Some(compiled) = &compiled {
            entries.extend(compiled.entries.iter().copied());
        }
        ensure_root(entries.iter().map(|e| e.object()), &root_name)?;

        let kinds: Vec<ColumnKind> = selection
            .iter()
            .zip(&columns)
            .map(|(s, c)| ColumnKind::of(s, c.entry))
            .collect();

        let mut sql_text = String::from("SELECT ");
        if query.distinct {
            sql_text.push_str("DISTINCT ");
        }
        sql_text.push_str(
            &columns
                .iter()
                .map(|c| c.expr.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );
        sql_text.push_str(" FROM ");
        sql_text.push_str(&self.from_clause(root, &entries));

        if let Some(compiled) = &compiled {
            sql_text.push_str(&format!(" WHERE {}", compiled.sql));
        }

        let group_by: Vec<&str> = columns.iter().filter_map(|c| c.group_by.as_deref()).collect();
        if !group_by.is_empty() {
            sql_text.push_str(&format!(" GROUP BY {}", group_by.join(", ")));
        }

        let order_by: Vec<String> = columns
            .iter()
            .filter_map(|c| c.order.as_ref())
            .map(|(expr, direction)| format!("{} {}", expr, direction))
            .collect();
        if !order_by.is_empty() {
            sql_text.push_str(&format!(" ORDER BY {}", order_by.join(", ")));
        }

        sql_text.push_str(
            &sql.dialect()
                .build_limit_offset(query.window.limit, query.window.offset),
        );

        let Some(table) = sql.query_table(&sql_text)? else {
            return Ok(None);
        };

        let rows = table
            .rows()
            .map(|row| decode_row(sql.dialect(), &kinds, row))
            .collect::<DbResult<Vec<Row>>>()?;

        Ok(Some(Box::new(TableValues { rows, pos: 0 })))
    }

    fn update(
        &self,
        sql: &mut Sql,
        assignments: &[Assignment],
        criteria: Option<&Criteria>,
        window: Window,
        order: IdentsOrder,
    ) -> DbResult<usize> {
        let Some((first, _)) = assignments.first() else {
            return Ok(0);
        };
        let kind: MessageKind = first.root().parse()?;

        let idents = match self.get_idents(sql, kind, criteria, window, order)? {
            Some(mut idents) => {
                let mut all = Vec::new();
                while let Some(ident) = idents.next()? {
                    all.push(ident);
                }
                all
            }
            None => return Ok(0),
        };

        self.update_from_list(sql, assignments, kind, &idents)
    }

    fn update_from_list(
        &self,
        sql: &mut Sql,
        assignments: &[Assignment],
        kind: MessageKind,
        idents: &[u64],
    ) -> DbResult<usize> {
        if assignments.is_empty() || idents.is_empty() {
            return Ok(0);
        }

        let root = self.message_table(kind.root())?;
        let rows = self.table_rows(
            sql.dialect(),
            kind.root(),
            assignments.iter().map(|(p, v)| (p, v.as_ref())),
        )?;

        let existing = self.existing_idents(sql, root.table, root.ident, idents)?;
        if existing.is_empty() {
            return Ok(0);
        }

        let mut present = BTreeMap::new();
        for (table, row) in &rows {
            if *table != root.table {
                let found = self.existing_idents(sql, table, row.ident_field, &existing)?;
                present.insert(*table, found.into_iter().collect::<BTreeSet<u64>>());
            }
        }

        sql.internal_transaction(|sql| {
            for (table, row) in &rows {
                let set = row
                    .columns
                    .iter()
                    .map(|(c, v)| format!("{} = {}", c, v))
                    .collect::<Vec<_>>()
                    .join(", ");

                if *table == root.table {
                    sql.execute(&format!(
                        "UPDATE {} SET {} WHERE {} IN ({})",
                        table,
                        set,
                        root.ident,
                        ident_list(&existing)
                    ))?;
                    continue;
                }

                let found = present.get(table).cloned().unwrap_or_default();
                if !found.is_empty() {
                    let found: Vec<u64> = found.iter().copied().collect();
                    sql.execute(&format!(
                        "UPDATE {} SET {} WHERE {} IN ({})",
                        table,
                        set,
                        row.ident_field,
                        ident_list(&found)
                    ))?;
                }

                for ident in existing.iter().filter(|i| !found.contains(*i)) {
                    let mut columns = vec![(row.ident_field.to_string(), ident.to_string())];
                    columns.extend(row.columns.iter().cloned());
                    sql.execute(&insert_statement(table, &columns))?;
                }
            }
            Ok(existing.len())
        })
    }
}

fn ident_field(entry: &MappingEntry) -> &str {
    entry.ident_field().unwrap_or(DEFAULT_IDENT_FIELD)
}

/// Microsecond and GMT offset columns of a time object
fn time_parts(entry: &MappingEntry) -> impl Iterator<Item = &str> {
    entry.usec_field().into_iter().chain(entry.gmtoff_field())
}

fn ident_list(idents: &[u64]) -> String {
    idents
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_statement(table: &str, columns: &[(String, String)]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", table);
    }

    let (names, values): (Vec<&str>, Vec<&str>) = columns
        .iter()
        .map(|(c, v)| (c.as_str(), v.as_str()))
        .unzip();

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        names.join(", "),
        values.join(", ")
    )
}

fn ensure_root<'a>(
    mut objects: impl Iterator<Item = &'a ObjectPath>,
    root: &str,
) -> DbResult<()> {
    match objects.find(|o| o.root() != root) {
        Some(other) => Err(DbError::InvalidValue(format!(
            "cannot mix '{}' with {} objects",
            other, root
        ))),
        None => Ok(()),
    }
}

fn literal(dialect: &dyn SqlDialect, value: &Value) -> DbResult<String> {
    match value {
        Value::String(s) => dialect.escape(s),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Float(x) if x.is_finite() => Ok(x.to_string()),
        Value::Float(x) => Err(DbError::InvalidValue(format!("cannot store {}", x))),
        Value::Time(t) => dialect.escape(&sql_timestamp(t)),
        Value::Binary(b) => Ok(dialect.escape_binary(b)),
    }
}

fn field_text(field: &SqlField) -> DbResult<&str> {
    field
        .as_str()
        .ok_or_else(|| DbError::InvalidValue("column is not valid UTF-8".to_string()))
}

fn parse_field<T: std::str::FromStr>(field: &SqlField) -> DbResult<T> {
    field.parse()
}

fn decode(dialect: &dyn SqlDialect, kind: ColumnKind, field: &SqlField) -> DbResult<Option<Value>> {
    if field.is_null() {
        return Ok(None);
    }

    let value = match kind {
        ColumnKind::Integer | ColumnKind::Stored(Storage::Integer) => {
            Value::Integer(parse_field(field)?)
        }
        ColumnKind::Float | ColumnKind::Stored(Storage::Float) => Value::Float(parse_field(field)?),
        ColumnKind::Number => match parse_field::<i64>(field) {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::Float(parse_field(field)?),
        },
        ColumnKind::Stored(Storage::Text) => Value::String(field_text(field)?.to_string()),
        ColumnKind::Stored(Storage::Binary) => {
            Value::Binary(dialect.unescape_binary(field_text(field)?)?)
        }
        ColumnKind::Stored(Storage::Time) => Value::Time(time_from_parts(field_text(field)?, 0, 0)?),
    };

    Ok(Some(value))
}

/// Decode one object from the front of `fields`, returning the value and
/// the number of columns it spans
fn read_object(
    dialect: &dyn SqlDialect,
    entry: &MappingEntry,
    fields: &[SqlField],
) -> DbResult<(Option<Value>, usize)> {
    let storage = Storage::of(entry);
    if storage != Storage::Time {
        let field = fields
            .first()
            .ok_or_else(|| DbError::InvalidColumn(entry.object().to_string()))?;
        return Ok((decode(dialect, ColumnKind::Stored(storage), field)?, 1));
    }

    let used = 1 + time_parts(entry).count();
    if fields.len() < used {
        return Err(DbError::InvalidColumn(entry.object().to_string()));
    }
    if fields[0].is_null() {
        return Ok((None, used));
    }

    let mut next = 1;
    let mut part = |present: bool| -> DbResult<i64> {
        if !present {
            return Ok(0);
        }
        let field = &fields[next];
        next += 1;
        if field.is_null() {
            Ok(0)
        } else {
            parse_field(field)
        }
    };
    let usec = part(entry.usec_field().is_some())?;
    let gmtoff = part(entry.gmtoff_field().is_some())?;

    let usec = u32::try_from(usec)
        .map_err(|_| DbError::InvalidValue(format!("invalid microseconds {}", usec)))?;
    let gmtoff = i32::try_from(gmtoff)
        .map_err(|_| DbError::InvalidValue(format!("invalid GMT offset {}", gmtoff)))?;

    Ok((
        Some(Value::Time(time_from_parts(field_text(&fields[0])?, usec, gmtoff)?)),
        used,
    ))
}

fn decode_row(dialect: &dyn SqlDialect, kinds: &[ColumnKind], row: &[SqlField]) -> DbResult<Row> {
    kinds
        .iter()
        .zip(row)
        .map(|(kind, field)| decode(dialect, *kind, field))
        .collect()
}

/// Idents read from a materialized table, first column
struct TableIdents {
    table: SqlTable,
    pos: usize,
}

impl TableIdents {
    fn new(table: SqlTable) -> Self {
        Self { table, pos: 0 }
    }
}

impl IdentsResource for TableIdents {
    fn next(&mut self) -> DbResult<Option<u64>> {
        let ident = self.ident_at(self.pos)?;
        if ident.is_some() {
            self.pos += 1;
        }
        Ok(ident)
    }

    fn ident_at(&mut self, row: usize) -> DbResult<Option<u64>> {
        if row >= self.table.row_count() {
            return Ok(None);
        }
        Ok(Some(self.table.field(row, 0)?.parse()?))
    }

    fn count(&self) -> DbResult<usize> {
        Ok(self.table.row_count())
    }
}

/// Decoded rows of a values query
struct TableValues {
    rows: Vec<Row>,
    pos: usize,
}

impl ValuesResource for TableValues {
    fn next(&mut self) -> DbResult<Option<Row>> {
        let row = self.rows.get(self.pos).cloned();
        if row.is_some() {
            self.pos += 1;
        }
        Ok(row)
    }

    fn row_at(&mut self, row: usize) -> DbResult<Option<Row>> {
        Ok(self.rows.get(row).cloned())
    }

    fn count(&self) -> DbResult<usize> {
        Ok(self.rows.len())
    }
}
