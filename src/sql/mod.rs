//! SQL Session Layer
//!
//! - [`SqlDialect`]: pure SQL fragment builders per backend
//! - [`SqlBackend`] / [`SqlPlugin`]: the connection contract
//! - [`Sql`]: one session plus transaction bookkeeping, used by formats
//!
//! # Transactions
//!
//! Formats wrap multi-statement operations in
//! [`Sql::internal_transaction`]. While the caller holds an explicit
//! transaction ([`Sql::transaction_start`]) those internal transactions are
//! folded into it instead of issuing nested `BEGIN`s.

pub mod backend;
pub mod dialect;
pub mod sqlite;
pub mod table;

pub use backend::{SqlBackend, SqlPlugin, SqlSettings};
pub use dialect::{PostgresDialect, SqlDialect};
pub use sqlite::{SqliteBackend, SqliteDialect, SqlitePlugin};
pub use table::{QueryOutcome, SqlField, SqlTable};

use crate::error::{DbError, DbResult};
use tracing::trace;

/// An open session
pub struct Sql {
    backend: Box<dyn SqlBackend>,
    in_transaction: bool,
}

impl Sql {
    pub fn new(backend: Box<dyn SqlBackend>) -> Self {
        Self {
            backend,
            in_transaction: false,
        }
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.backend.dialect()
    }

    pub fn query(&mut self, sql: &str) -> DbResult<QueryOutcome> {
        trace!(target: "idmefdb::sql", "{}", sql);

        let result = self.backend.query(sql);
        if let Err(e) = &result {
            if e.is_connection_error() {
                self.in_transaction = false;
            }
        }
        result
    }

    /// Run a query, `None` when it produced no rows
    pub fn query_table(&mut self, sql: &str) -> DbResult<Option<SqlTable>> {
        Ok(self.query(sql)?.into_table())
    }

    /// Run a statement, discarding any rows
    pub fn execute(&mut self, sql: &str) -> DbResult<()> {
        self.query(sql).map(|_| ())
    }

    pub fn execute_script(&mut self, script: &str) -> DbResult<()> {
        trace!(target: "idmefdb::sql", "script of {} bytes", script.len());
        self.backend.execute_script(script)
    }

    pub fn escape(&self, input: &str) -> DbResult<String> {
        self.dialect().escape(input)
    }

    pub fn escape_binary(&self, input: &[u8]) -> String {
        self.dialect().escape_binary(input)
    }

    pub fn unescape_binary(&self, input: &str) -> DbResult<Vec<u8>> {
        self.dialect().unescape_binary(input)
    }

    pub fn last_insert_ident(&mut self) -> DbResult<u64> {
        self.backend.last_insert_ident()
    }

    pub fn server_version(&self) -> i64 {
        self.backend.server_version()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn transaction_start(&mut self) -> DbResult<()> {
        if self.in_transaction {
            return Err(DbError::InvalidValue(
                "a transaction is already in progress".to_string(),
            ));
        }
        self.execute("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commit the explicit transaction.
    ///
    /// A failed commit leaves the transaction open, so the caller can still
    /// abort it.
    pub fn transaction_end(&mut self) -> DbResult<()> {
        self.ensure_transaction()?;
        self.execute("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    /// Roll back the explicit transaction. The session leaves transaction
    /// mode even when the rollback itself fails.
    pub fn transaction_abort(&mut self) -> DbResult<()> {
        self.ensure_transaction()?;
        let result = self.execute("ROLLBACK");
        self.in_transaction = false;
        result
    }

    fn ensure_transaction(&self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::InvalidValue("no transaction in progress".to_string()));
        }
        Ok(())
    }

    /// Run `f` atomically unless an explicit transaction is already open.
    ///
    /// On failure, including a failed commit, the work is rolled back and
    /// the first error is returned.
    pub fn internal_transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Sql) -> DbResult<T>,
    ) -> DbResult<T> {
        if self.in_transaction {
            return f(self);
        }

        self.execute("BEGIN")?;
        let result = f(self).and_then(|value| self.execute("COMMIT").map(|_| value));
        if result.is_err() {
            // the first error wins over a failed rollback
            let _ = self.execute("ROLLBACK");
        }
        result
    }
}

impl std::fmt::Debug for Sql {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sql")
            .field("dialect", &self.dialect().name())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Sql {
        let mut sql = Sql::new(Box::new(SqliteBackend::open_in_memory().unwrap()));
        sql.execute_script("CREATE TABLE t (v INTEGER);").unwrap();
        sql
    }

    fn count(sql: &mut Sql) -> i64 {
        sql.query_table("SELECT COUNT(*) FROM t")
            .unwrap()
            .unwrap()
            .field(0, 0)
            .unwrap()
            .parse()
            .unwrap()
    }

    #[test]
    fn test_internal_transaction_commits() {
        let mut sql = session();
        let result = sql.internal_transaction(|sql| {
            sql.execute("INSERT INTO t VALUES (1)")?;
            sql.execute("INSERT INTO t VALUES (2)")?;
            Ok(2)
        });
        assert_eq!(result.unwrap(), 2);
        assert_eq!(count(&mut sql), 2);
    }

    #[test]
    fn test_internal_transaction_rolls_back() {
        let mut sql = session();
        let result: DbResult<()> = sql.internal_transaction(|sql| {
            sql.execute("INSERT INTO t VALUES (1)")?;
            sql.execute("INSERT INTO missing VALUES (1)")
        });
        assert!(matches!(result, Err(DbError::Query(_))));
        assert_eq!(count(&mut sql), 0);
    }

    #[test]
    fn test_explicit_transaction_absorbs_internal() {
        let mut sql = session();
        sql.transaction_start().unwrap();
        assert!(sql.in_transaction());
        assert!(sql.transaction_start().is_err());

        sql.internal_transaction(|sql| sql.execute("INSERT INTO t VALUES (1)"))
            .unwrap();
        sql.transaction_abort().unwrap();

        assert!(!sql.in_transaction());
        assert_eq!(count(&mut sql), 0);
        assert!(sql.transaction_end().is_err());
    }

    /// Session whose commits fail while a `c` row has no parent
    fn deferred_fk_session() -> Sql {
        let mut sql = session();
        sql.execute_script(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE p (id INTEGER PRIMARY KEY);
             CREATE TABLE c (pid INTEGER REFERENCES p(id) DEFERRABLE INITIALLY DEFERRED);",
        )
        .unwrap();
        sql
    }

    #[test]
    fn test_internal_transaction_failed_commit_rolls_back() {
        let mut sql = deferred_fk_session();
        let result = sql.internal_transaction(|sql| {
            sql.execute("INSERT INTO t VALUES (1)")?;
            sql.execute("INSERT INTO c VALUES (42)")
        });
        assert!(matches!(result, Err(DbError::Query(_))));
        assert!(!sql.in_transaction());
        assert_eq!(count(&mut sql), 0);

        sql.internal_transaction(|sql| sql.execute("INSERT INTO t VALUES (2)"))
            .unwrap();
        assert_eq!(count(&mut sql), 1);
    }

    #[test]
    fn test_failed_commit_keeps_transaction_open() {
        let mut sql = deferred_fk_session();
        sql.transaction_start().unwrap();
        sql.execute("INSERT INTO t VALUES (1)").unwrap();
        sql.execute("INSERT INTO c VALUES (42)").unwrap();

        assert!(matches!(sql.transaction_end(), Err(DbError::Query(_))));
        assert!(sql.in_transaction());

        sql.transaction_abort().unwrap();
        assert!(!sql.in_transaction());
        assert_eq!(count(&mut sql), 0);

        sql.transaction_start().unwrap();
        sql.execute("INSERT INTO t VALUES (3)").unwrap();
        sql.transaction_end().unwrap();
        assert_eq!(count(&mut sql), 1);
    }

    #[test]
    fn test_failed_commit_can_be_retried() {
        let mut sql = deferred_fk_session();
        sql.transaction_start().unwrap();
        sql.execute("INSERT INTO c VALUES (42)").unwrap();
        assert!(sql.transaction_end().is_err());

        sql.execute("INSERT INTO p VALUES (42)").unwrap();
        sql.transaction_end().unwrap();
        assert!(!sql.in_transaction());
    }

    #[test]
    fn test_explicit_transaction_commit() {
        let mut sql = session();
        sql.transaction_start().unwrap();
        sql.execute("INSERT INTO t VALUES (7)").unwrap();
        sql.transaction_end().unwrap();
        assert_eq!(count(&mut sql), 1);
    }
}
