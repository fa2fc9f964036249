//! SQLite driver backed by `rusqlite`.
//!
//! URLs take the form `sqlite::memory:` (a private in-memory database per
//! connection) or `sqlite:<path>`. Recognised properties:
//!
//! | key            | meaning                                          |
//! |----------------|--------------------------------------------------|
//! | `busy_timeout` | lock wait in milliseconds                        |
//! | `foreign_keys` | `on`/`off` (`true`/`false`, `1`/`0` accepted)    |
//! | `journal_mode` | one of `DELETE TRUNCATE PERSIST MEMORY WAL OFF`  |
//!
//! `user` and `password` are accepted and ignored. SQLite has no per-statement
//! timeout, so the statement timeout accessors report `Unsupported`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;

use crate::connection::{
    BufferedResultSet, Connection, Driver, PreparedStatement, ResultSet, Statement,
};
use crate::error::{DriverError, DriverResult};
use crate::properties::Properties;
use crate::types::{Metadata, Row, Value};

const URL_PREFIX: &str = "sqlite:";
const MEMORY: &str = ":memory:";
const JOURNAL_MODES: [&str; 6] = ["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];

// ── Value conversion ─────────────────────────────────────────────────

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            Value::Null => ValueRef::Null,
            Value::Integer(v) => ValueRef::Integer(*v),
            Value::Real(v) => ValueRef::Real(*v),
            Value::Text(v) => ValueRef::Text(v.as_bytes()),
            Value::Blob(v) => ValueRef::Blob(v),
        }))
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => Value::Blob(v.to_vec()),
        }
    }
}

/// Run a query and buffer every row.
fn fetch_all(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[Value],
) -> DriverResult<BufferedResultSet> {
    let mut stmt = conn.prepare_cached(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            values.push(Value::from(row.get_ref(index)?));
        }
        out.push(Row::new(values));
    }
    Ok(BufferedResultSet::new(columns, out))
}

fn execute(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> DriverResult<u64> {
    let mut stmt = conn.prepare_cached(sql)?;
    let affected = stmt.execute(rusqlite::params_from_iter(params.iter()))?;
    Ok(affected as u64)
}

// ── Driver ───────────────────────────────────────────────────────────

/// The built-in SQLite driver, registered as `"sqlite"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    fn apply_properties(conn: &rusqlite::Connection, properties: &Properties) -> DriverResult<()> {
        if let Some(ms) = properties.get("busy_timeout") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| DriverError::InvalidParameter(format!("busy_timeout={ms}")))?;
            conn.busy_timeout(Duration::from_millis(ms))?;
        }

        if let Some(flag) = properties.get("foreign_keys") {
            let enabled = match flag.to_ascii_lowercase().as_str() {
                "on" | "true" | "1" => true,
                "off" | "false" | "0" => false,
                _ => {
                    return Err(DriverError::InvalidParameter(format!("foreign_keys={flag}")));
                }
            };
            let pragma = if enabled { "ON" } else { "OFF" };
            conn.execute_batch(&format!("PRAGMA foreign_keys = {pragma}"))?;
        }

        if let Some(mode) = properties.get("journal_mode") {
            let mode = mode.to_ascii_uppercase();
            if !JOURNAL_MODES.contains(&mode.as_str()) {
                return Err(DriverError::InvalidParameter(format!("journal_mode={mode}")));
            }
            // The pragma answers with the mode actually in effect.
            let _: String =
                conn.query_row(&format!("PRAGMA journal_mode = {mode}"), [], |row| row.get(0))?;
        }

        Ok(())
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.strip_prefix(URL_PREFIX).is_some_and(|rest| !rest.is_empty())
    }

    fn connect(&self, url: &str, properties: &Properties) -> DriverResult<Box<dyn Connection>> {
        let target = url
            .strip_prefix(URL_PREFIX)
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| DriverError::UnsupportedUrl {
                driver: self.name().to_string(),
                url: url.to_string(),
            })?;

        let conn = if target == MEMORY {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(target)
        }
        .map_err(|e| DriverError::Connect(format!("{url}: {e}")))?;

        Self::apply_properties(&conn, properties)?;

        tracing::debug!(url = %url, properties = %properties, "opened sqlite connection");
        Ok(Box::new(SqliteConnection {
            conn: Mutex::new(Some(conn)),
            manual_commit: AtomicBool::new(false),
        }))
    }
}

// ── Connection ───────────────────────────────────────────────────────

/// A single SQLite database handle.
///
/// Manual-commit mode is emulated: switching auto-commit off opens a
/// transaction with `BEGIN`, and every `commit`/`rollback` immediately opens
/// the next one.
pub struct SqliteConnection {
    conn: Mutex<Option<rusqlite::Connection>>,
    manual_commit: AtomicBool,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("manual_commit", &self.manual_commit.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_ref().ok_or(DriverError::Closed)?;
        f(conn)
    }

    /// End the open transaction with `verb` and start the next one.
    fn finish_transaction(&self, verb: &str) -> DriverResult<()> {
        if !self.manual_commit.load(Ordering::Acquire) {
            return Err(DriverError::Transaction(format!(
                "{verb} requested while auto-commit is enabled"
            )));
        }
        self.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch(verb)?;
            }
            conn.execute_batch("BEGIN")?;
            Ok(())
        })
    }
}

impl Connection for SqliteConnection {
    fn create_statement(&self) -> DriverResult<Box<dyn Statement + '_>> {
        self.with_conn(|_| Ok(()))?;
        Ok(Box::new(SqliteStatement { conn: self, closed: false }))
    }

    fn prepare_statement(&self, sql: &str) -> DriverResult<Box<dyn PreparedStatement + '_>> {
        // Compile once up front so syntax errors surface here.
        self.with_conn(|conn| {
            conn.prepare_cached(sql)?;
            Ok(())
        })?;
        Ok(Box::new(SqlitePreparedStatement {
            conn: self,
            sql: sql.to_string(),
            bindings: Vec::new(),
            closed: false,
        }))
    }

    fn metadata(&self) -> DriverResult<Metadata> {
        self.with_conn(|_| {
            Ok(Metadata {
                product_name: "SQLite".to_string(),
                product_version: rusqlite::version().to_string(),
                supports_transactions: true,
            })
        })
    }

    fn auto_commit(&self) -> DriverResult<bool> {
        self.with_conn(|_| Ok(!self.manual_commit.load(Ordering::Acquire)))
    }

    fn set_auto_commit(&self, enabled: bool) -> DriverResult<()> {
        self.with_conn(|conn| {
            if enabled {
                if !conn.is_autocommit() {
                    conn.execute_batch("COMMIT")?;
                }
            } else if conn.is_autocommit() {
                conn.execute_batch("BEGIN")?;
            }
            self.manual_commit.store(!enabled, Ordering::Release);
            Ok(())
        })
    }

    fn commit(&self) -> DriverResult<()> {
        self.finish_transaction("COMMIT")
    }

    fn rollback(&self) -> DriverResult<()> {
        self.finish_transaction("ROLLBACK")
    }

    fn is_closed(&self) -> DriverResult<bool> {
        Ok(self.conn.lock().unwrap_or_else(PoisonError::into_inner).is_none())
    }

    fn close(&self) -> DriverResult<()> {
        let taken = self.conn.lock().unwrap_or_else(PoisonError::into_inner).take();
        match taken {
            Some(conn) => conn.close().map_err(|(_, e)| DriverError::from(e)),
            None => Ok(()),
        }
    }
}

// ── Statements ───────────────────────────────────────────────────────

struct SqliteStatement<'c> {
    conn: &'c SqliteConnection,
    closed: bool,
}

impl SqliteStatement<'_> {
    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        Ok(())
    }
}

impl Statement for SqliteStatement<'_> {
    fn execute_query(&mut self, sql: &str) -> DriverResult<Box<dyn ResultSet + '_>> {
        self.ensure_open()?;
        let rs = self.conn.with_conn(|conn| fetch_all(conn, sql, &[]))?;
        Ok(Box::new(rs))
    }

    fn execute_update(&mut self, sql: &str) -> DriverResult<u64> {
        self.ensure_open()?;
        self.conn.with_conn(|conn| execute(conn, sql, &[]))
    }

    fn query_timeout(&self) -> DriverResult<Duration> {
        Err(DriverError::Unsupported("statement query timeout"))
    }

    fn set_query_timeout(&mut self, _timeout: Duration) -> DriverResult<()> {
        Err(DriverError::Unsupported("statement query timeout"))
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        Ok(())
    }
}

struct SqlitePreparedStatement<'c> {
    conn: &'c SqliteConnection,
    sql: String,
    bindings: Vec<Value>,
    closed: bool,
}

impl SqlitePreparedStatement<'_> {
    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        Ok(())
    }
}

impl PreparedStatement for SqlitePreparedStatement<'_> {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&mut self, index: usize, value: Value) -> DriverResult<()> {
        self.ensure_open()?;
        if index == 0 {
            return Err(DriverError::InvalidParameter(
                "parameter indexes start at 1".to_string(),
            ));
        }
        if self.bindings.len() < index {
            self.bindings.resize(index, Value::Null);
        }
        self.bindings[index - 1] = value;
        Ok(())
    }

    fn clear_bindings(&mut self) {
        self.bindings.clear();
    }

    fn execute_query(&mut self) -> DriverResult<Box<dyn ResultSet + '_>> {
        self.ensure_open()?;
        let rs = self
            .conn
            .with_conn(|conn| fetch_all(conn, &self.sql, &self.bindings))?;
        Ok(Box::new(rs))
    }

    fn execute_update(&mut self) -> DriverResult<u64> {
        self.ensure_open()?;
        self.conn.with_conn(|conn| execute(conn, &self.sql, &self.bindings))
    }

    fn query_timeout(&self) -> DriverResult<Duration> {
        Err(DriverError::Unsupported("statement query timeout"))
    }

    fn set_query_timeout(&mut self, _timeout: Duration) -> DriverResult<()> {
        Err(DriverError::Unsupported("statement query timeout"))
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        Ok(())
    }
}
