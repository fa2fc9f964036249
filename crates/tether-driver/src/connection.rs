//! Driver-layer traits.
//!
//! A [`Driver`] opens [`Connection`]s; a connection produces [`Statement`]s
//! and [`PreparedStatement`]s, which produce [`ResultSet`]s. Everything is
//! synchronous and object-safe so higher layers can decorate any driver
//! behind `Box<dyn ...>`.
//!
//! ```text
//! Driver::connect(url, properties)
//!   → Connection
//!     → create_statement()    → Statement         → execute_query(sql) → ResultSet
//!     → prepare_statement(sql) → PreparedStatement → execute_query()    → ResultSet
//! ```

use std::time::Duration;

use crate::error::DriverResult;
use crate::properties::Properties;
use crate::types::{Metadata, Row, Value};

/// Entry point of a database driver.
pub trait Driver: Send + Sync {
    /// Short identifier, e.g. `"sqlite"`.
    fn name(&self) -> &str;

    /// Whether this driver understands the given URL.
    fn accepts_url(&self, url: &str) -> bool;

    /// Open a new physical connection.
    fn connect(&self, url: &str, properties: &Properties) -> DriverResult<Box<dyn Connection>>;
}

/// An open database connection.
///
/// All methods take `&self`; drivers synchronize internally so a connection
/// can be shared behind an `Arc` and probed by one thread while owned by
/// another.
pub trait Connection: Send + Sync {
    fn create_statement(&self) -> DriverResult<Box<dyn Statement + '_>>;

    fn prepare_statement(&self, sql: &str) -> DriverResult<Box<dyn PreparedStatement + '_>>;

    fn metadata(&self) -> DriverResult<Metadata>;

    fn auto_commit(&self) -> DriverResult<bool>;

    fn set_auto_commit(&self, enabled: bool) -> DriverResult<()>;

    fn commit(&self) -> DriverResult<()>;

    fn rollback(&self) -> DriverResult<()>;

    /// Whether the connection has been closed, locally or by the server.
    fn is_closed(&self) -> DriverResult<bool>;

    fn close(&self) -> DriverResult<()>;
}

/// A plain SQL statement.
pub trait Statement: Send {
    fn execute_query(&mut self, sql: &str) -> DriverResult<Box<dyn ResultSet + '_>>;

    /// Execute a statement that returns no rows. Returns rows affected.
    fn execute_update(&mut self, sql: &str) -> DriverResult<u64>;

    fn query_timeout(&self) -> DriverResult<Duration>;

    fn set_query_timeout(&mut self, timeout: Duration) -> DriverResult<()>;

    fn close(&mut self) -> DriverResult<()>;
}

/// A statement with positional parameters (1-based).
pub trait PreparedStatement: Send {
    fn sql(&self) -> &str;

    fn bind(&mut self, index: usize, value: Value) -> DriverResult<()>;

    fn clear_bindings(&mut self);

    fn execute_query(&mut self) -> DriverResult<Box<dyn ResultSet + '_>>;

    fn execute_update(&mut self) -> DriverResult<u64>;

    fn query_timeout(&self) -> DriverResult<Duration>;

    fn set_query_timeout(&mut self, timeout: Duration) -> DriverResult<()>;

    fn close(&mut self) -> DriverResult<()>;
}

/// Forward-only cursor over query results.
pub trait ResultSet: Send {
    fn columns(&self) -> &[String];

    fn next_row(&mut self) -> DriverResult<Option<Row>>;

    fn close(&mut self) -> DriverResult<()>;

    /// Drain the remaining rows.
    fn rows(&mut self) -> DriverResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

/// A [`ResultSet`] over rows already fetched into memory.
#[derive(Debug, Clone, Default)]
pub struct BufferedResultSet {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Row>,
    closed: bool,
}

impl BufferedResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
            closed: false,
        }
    }
}

impl ResultSet for BufferedResultSet {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> DriverResult<Option<Row>> {
        if self.closed {
            return Err(crate::DriverError::Closed);
        }
        Ok(self.rows.next())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        Ok(())
    }
}
