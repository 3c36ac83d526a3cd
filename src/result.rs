//! Result handles
//!
//! Queries return cursors over rows the format produced. A handle is cheap
//! to clone with [`IdentsResult::r#ref`] / [`ValuesResult::r#ref`]; every
//! clone aliases the same cursor, and the underlying resource is released
//! once, when the last clone is dropped. Every handle also keeps the
//! [`Database`] that produced it alive.

use crate::db::Database;
use crate::error::{DbError, DbResult};
use crate::selection::PathSelection;
use crate::value::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One row of a values query, one entry per selected path. `None` is SQL NULL.
pub type Row = Vec<Option<Value>>;

/// Format-side cursor over message idents
pub trait IdentsResource: Send {
    /// Next ident, `None` once exhausted
    fn next(&mut self) -> DbResult<Option<u64>>;

    /// Direct access to row `row`
    fn ident_at(&mut self, _row: usize) -> DbResult<Option<u64>> {
        Err(DbError::NotSupported("direct ident access".to_string()))
    }

    /// Total number of rows
    fn count(&self) -> DbResult<usize> {
        Err(DbError::NotSupported("ident count".to_string()))
    }
}

/// Format-side cursor over selected values
pub trait ValuesResource: Send {
    fn next(&mut self) -> DbResult<Option<Row>>;

    fn row_at(&mut self, _row: usize) -> DbResult<Option<Row>> {
        Err(DbError::NotSupported("direct row access".to_string()))
    }

    fn count(&self) -> DbResult<usize> {
        Err(DbError::NotSupported("row count".to_string()))
    }
}

/// Cursor state. Releasing is not a state: it happens on the final drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultState {
    Open,
    Exhausted,
}

struct Cursor<R: ?Sized> {
    state: ResultState,
    resource: Box<R>,
}

impl<R: ?Sized> Cursor<R> {
    fn new(resource: Box<R>) -> Mutex<Self> {
        Mutex::new(Self {
            state: ResultState::Open,
            resource,
        })
    }
}

fn lock<R: ?Sized>(cursor: &Mutex<Cursor<R>>) -> MutexGuard<'_, Cursor<R>> {
    // a panicking reader leaves the cursor position valid
    cursor.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared handle over the idents matching a query
#[derive(Clone)]
pub struct IdentsResult {
    inner: Arc<Mutex<Cursor<dyn IdentsResource>>>,
    database: Database,
}

impl IdentsResult {
    pub fn new(resource: Box<dyn IdentsResource>, database: Database) -> Self {
        Self {
            inner: Arc::new(Cursor::new(resource)),
            database,
        }
    }

    /// The database this result was queried from
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Another handle on the same cursor
    pub fn r#ref(&self) -> Self {
        self.clone()
    }

    /// Number of live handles on this result
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn state(&self) -> ResultState {
        lock(&self.inner).state
    }

    /// Next ident, `None` when exhausted. Exhaustion is not an error.
    pub fn get_next(&self) -> DbResult<Option<u64>> {
        let mut cursor = lock(&self.inner);
        if cursor.state == ResultState::Exhausted {
            return Ok(None);
        }

        let next = cursor.resource.next()?;
        if next.is_none() {
            cursor.state = ResultState::Exhausted;
        }
        Ok(next)
    }

    /// Ident at row `row`, independent of the cursor
    pub fn get(&self, row: usize) -> DbResult<Option<u64>> {
        lock(&self.inner).resource.ident_at(row)
    }

    pub fn count(&self) -> DbResult<usize> {
        lock(&self.inner).resource.count()
    }

    /// Drain the remaining idents
    pub fn collect_remaining(&self) -> DbResult<Vec<u64>> {
        let mut idents = Vec::new();
        while let Some(ident) = self.get_next()? {
            idents.push(ident);
        }
        Ok(idents)
    }
}

impl std::fmt::Debug for IdentsResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentsResult")
            .field("state", &self.state())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Shared handle over the rows of a values query.
///
/// Holds the [`PathSelection`] the rows were produced for, so column `i` of
/// a row is always `selection().get(i)`.
#[derive(Clone)]
pub struct ValuesResult {
    inner: Arc<Mutex<Cursor<dyn ValuesResource>>>,
    selection: Arc<PathSelection>,
    database: Database,
}

impl ValuesResult {
    pub fn new(
        resource: Box<dyn ValuesResource>,
        selection: Arc<PathSelection>,
        database: Database,
    ) -> Self {
        Self {
            inner: Arc::new(Cursor::new(resource)),
            selection,
            database,
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn r#ref(&self) -> Self {
        self.clone()
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn state(&self) -> ResultState {
        lock(&self.inner).state
    }

    pub fn selection(&self) -> &PathSelection {
        &self.selection
    }

    /// Columns per row
    pub fn field_count(&self) -> usize {
        self.selection.len()
    }

    pub fn get_next(&self) -> DbResult<Option<Row>> {
        let mut cursor = lock(&self.inner);
        if cursor.state == ResultState::Exhausted {
            return Ok(None);
        }

        let next = cursor.resource.next()?;
        if next.is_none() {
            cursor.state = ResultState::Exhausted;
        }
        Ok(next)
    }

    pub fn get(&self, row: usize) -> DbResult<Option<Row>> {
        lock(&self.inner).resource.row_at(row)
    }

    pub fn count(&self) -> DbResult<usize> {
        lock(&self.inner).resource.count()
    }
}

impl std::fmt::Debug for ValuesResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValuesResult")
            .field("state", &self.state())
            .field("refs", &self.ref_count())
            .field("fields", &self.field_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ClassicFormat;
    use crate::sql::{Sql, SqliteBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn database() -> Database {
        let sql = Sql::new(Box::new(SqliteBackend::open_in_memory().unwrap()));
        Database::with_format(sql, Arc::new(ClassicFormat::with_default_mapping().unwrap()))
    }

    struct Counted {
        idents: Vec<u64>,
        pos: usize,
        released: Arc<AtomicUsize>,
    }

    impl IdentsResource for Counted {
        fn next(&mut self) -> DbResult<Option<u64>> {
            let ident = self.idents.get(self.pos).copied();
            self.pos += 1;
            Ok(ident)
        }
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counted(idents: Vec<u64>) -> (IdentsResult, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let result = IdentsResult::new(
            Box::new(Counted {
                idents,
                pos: 0,
                released: released.clone(),
            }),
            database(),
        );
        (result, released)
    }

    #[test]
    fn test_release_exactly_once_on_last_drop() {
        for n in 0..4 {
            let (result, released) = counted(vec![1]);

            let mut handles: Vec<IdentsResult> = (0..n).map(|_| result.r#ref()).collect();
            handles.push(result);
            assert_eq!(handles[0].ref_count(), n + 1);

            while handles.len() > 1 {
                handles.pop();
                assert_eq!(released.load(Ordering::SeqCst), 0);
            }
            handles.pop();
            assert_eq!(released.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_refs_share_the_cursor() {
        let (result, _) = counted(vec![10, 20, 30]);
        let alias = result.r#ref();

        assert_eq!(result.get_next().unwrap(), Some(10));
        assert_eq!(alias.get_next().unwrap(), Some(20));
        assert_eq!(result.collect_remaining().unwrap(), vec![30]);

        assert_eq!(alias.state(), ResultState::Exhausted);
        assert_eq!(alias.get_next().unwrap(), None);
    }

    #[test]
    fn test_optional_capabilities_report_not_supported() {
        let (result, _) = counted(vec![1]);
        assert!(matches!(result.get(0), Err(DbError::NotSupported(_))));
        assert!(matches!(result.count(), Err(DbError::NotSupported(_))));
    }

    struct Rows(Vec<Row>);

    impl ValuesResource for Rows {
        fn next(&mut self) -> DbResult<Option<Row>> {
            Ok(if self.0.is_empty() {
                None
            } else {
                Some(self.0.remove(0))
            })
        }
    }

    #[test]
    fn test_values_result_keeps_selection() {
        let selection = Arc::new(PathSelection::compile("alert.messageid, count(alert.messageid)").unwrap());
        let result = ValuesResult::new(
            Box::new(Rows(vec![vec![Some(Value::from("a")), Some(Value::Integer(2))]])),
            selection.clone(),
            database(),
        );
        drop(selection);

        assert_eq!(result.field_count(), 2);
        assert_eq!(
            result.selection().get(1).unwrap().path.to_string(),
            "alert.messageid"
        );

        let row = result.get_next().unwrap().unwrap();
        assert_eq!(row[1], Some(Value::Integer(2)));
        assert_eq!(result.get_next().unwrap(), None);
        assert_eq!(result.state(), ResultState::Exhausted);
    }

    #[test]
    fn test_handles_share_the_database() {
        let (result, _) = counted(vec![1]);
        let alias = result.r#ref();
        assert_eq!(result.database().format_name(), "classic");

        drop(result);
        assert_eq!(alias.database().format_name(), "classic");
        assert_eq!(alias.collect_remaining().unwrap(), vec![1]);
    }
}
