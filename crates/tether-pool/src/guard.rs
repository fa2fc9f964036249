//! Guarded connections: one uniform connection behaviour over uneven drivers.
//!
//! [`GuardedConnection`] implements the same [`Connection`] trait as the raw
//! driver connection it wraps and forwards every call unchanged, except:
//!
//! - `close()` is a no-op. The registry owns the physical close and uses
//!   [`GuardedConnection::close_underlying`] on eviction and shutdown.
//! - `set_auto_commit`, `commit` and `rollback` are no-ops when the driver
//!   reported no transaction support at open time.
//! - Statements are wrapped in [`GuardedStatement`] /
//!   [`GuardedPreparedStatement`], and their result sets are wrapped in
//!   turn, so derived objects carry the same adaptation.
//! - A statement whose driver cannot report its query timeout reports zero
//!   instead of failing.

use std::fmt;
use std::time::Duration;

use tether_driver::{
    Connection, DriverResult, Metadata, PreparedStatement, ResultSet, Row, Statement, Value,
};

/// A cached connection handle as seen by application code.
pub struct GuardedConnection {
    id: u64,
    inner: Box<dyn Connection>,
    supports_transactions: bool,
    description: String,
}

impl GuardedConnection {
    pub(crate) fn new(
        id: u64,
        inner: Box<dyn Connection>,
        supports_transactions: bool,
        description: String,
    ) -> Self {
        Self {
            id,
            inner,
            supports_transactions,
            description,
        }
    }

    /// Open ordinal of this handle within its registry (1-based).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Transaction support, as reported by the driver when the handle opened.
    pub fn supports_transactions(&self) -> bool {
        self.supports_transactions
    }

    /// `#<id> <url> [<owner>]`
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Create a statement, keeping the concrete guarded type.
    pub fn statement(&self) -> DriverResult<GuardedStatement<'_>> {
        Ok(GuardedStatement {
            connection: self,
            inner: self.inner.create_statement()?,
        })
    }

    /// Prepare a statement, keeping the concrete guarded type.
    pub fn prepare(&self, sql: &str) -> DriverResult<GuardedPreparedStatement<'_>> {
        Ok(GuardedPreparedStatement {
            connection: self,
            inner: self.inner.prepare_statement(sql)?,
        })
    }

    /// Close the physical connection.
    pub(crate) fn close_underlying(&self) -> DriverResult<()> {
        self.inner.close()
    }

    fn skip_transaction_call(&self, call: &'static str) -> bool {
        if !self.supports_transactions {
            tracing::trace!(connection = %self.description, call, "driver has no transactions, skipping");
            return true;
        }
        false
    }
}

impl Connection for GuardedConnection {
    fn create_statement(&self) -> DriverResult<Box<dyn Statement + '_>> {
        Ok(Box::new(self.statement()?))
    }

    fn prepare_statement(&self, sql: &str) -> DriverResult<Box<dyn PreparedStatement + '_>> {
        Ok(Box::new(self.prepare(sql)?))
    }

    fn metadata(&self) -> DriverResult<Metadata> {
        self.inner.metadata()
    }

    fn auto_commit(&self) -> DriverResult<bool> {
        self.inner.auto_commit()
    }

    fn set_auto_commit(&self, enabled: bool) -> DriverResult<()> {
        if self.skip_transaction_call("set_auto_commit") {
            return Ok(());
        }
        self.inner.set_auto_commit(enabled)
    }

    fn commit(&self) -> DriverResult<()> {
        if self.skip_transaction_call("commit") {
            return Ok(());
        }
        self.inner.commit()
    }

    fn rollback(&self) -> DriverResult<()> {
        if self.skip_transaction_call("rollback") {
            return Ok(());
        }
        self.inner.rollback()
    }

    fn is_closed(&self) -> DriverResult<bool> {
        self.inner.is_closed()
    }

    /// No-op: the registry owns the physical close.
    fn close(&self) -> DriverResult<()> {
        tracing::trace!(connection = %self.description, "close() ignored on cached connection");
        Ok(())
    }
}

impl fmt::Debug for GuardedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedConnection")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("supports_transactions", &self.supports_transactions)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for GuardedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

fn timeout_or_zero(result: DriverResult<Duration>, connection: &GuardedConnection) -> Duration {
    result.unwrap_or_else(|e| {
        tracing::trace!(connection = %connection.description, error = %e, "query timeout unavailable, reporting zero");
        Duration::ZERO
    })
}

// ── Statements ───────────────────────────────────────────────────────

/// A statement created through a [`GuardedConnection`].
pub struct GuardedStatement<'c> {
    connection: &'c GuardedConnection,
    inner: Box<dyn Statement + 'c>,
}

impl<'c> GuardedStatement<'c> {
    /// The guarded connection this statement came from.
    pub fn connection(&self) -> &'c GuardedConnection {
        self.connection
    }
}

impl Statement for GuardedStatement<'_> {
    fn execute_query(&mut self, sql: &str) -> DriverResult<Box<dyn ResultSet + '_>> {
        let inner = self.inner.execute_query(sql)?;
        Ok(Box::new(GuardedResultSet { inner }))
    }

    fn execute_update(&mut self, sql: &str) -> DriverResult<u64> {
        self.inner.execute_update(sql)
    }

    fn query_timeout(&self) -> DriverResult<Duration> {
        Ok(timeout_or_zero(self.inner.query_timeout(), self.connection))
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> DriverResult<()> {
        self.inner.set_query_timeout(timeout)
    }

    fn close(&mut self) -> DriverResult<()> {
        self.inner.close()
    }
}

/// A prepared statement created through a [`GuardedConnection`].
pub struct GuardedPreparedStatement<'c> {
    connection: &'c GuardedConnection,
    inner: Box<dyn PreparedStatement + 'c>,
}

impl<'c> GuardedPreparedStatement<'c> {
    pub fn connection(&self) -> &'c GuardedConnection {
        self.connection
    }
}

impl PreparedStatement for GuardedPreparedStatement<'_> {
    fn sql(&self) -> &str {
        self.inner.sql()
    }

    fn bind(&mut self, index: usize, value: Value) -> DriverResult<()> {
        self.inner.bind(index, value)
    }

    fn clear_bindings(&mut self) {
        self.inner.clear_bindings();
    }

    fn execute_query(&mut self) -> DriverResult<Box<dyn ResultSet + '_>> {
        let inner = self.inner.execute_query()?;
        Ok(Box::new(GuardedResultSet { inner }))
    }

    fn execute_update(&mut self) -> DriverResult<u64> {
        self.inner.execute_update()
    }

    fn query_timeout(&self) -> DriverResult<Duration> {
        Ok(timeout_or_zero(self.inner.query_timeout(), self.connection))
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> DriverResult<()> {
        self.inner.set_query_timeout(timeout)
    }

    fn close(&mut self) -> DriverResult<()> {
        self.inner.close()
    }
}

// ── Result sets ──────────────────────────────────────────────────────

struct GuardedResultSet<'s> {
    inner: Box<dyn ResultSet + 's>,
}

impl ResultSet for GuardedResultSet<'_> {
    fn columns(&self) -> &[String] {
        self.inner.columns()
    }

    fn next_row(&mut self) -> DriverResult<Option<Row>> {
        self.inner.next_row()
    }

    fn close(&mut self) -> DriverResult<()> {
        self.inner.close()
    }
}
