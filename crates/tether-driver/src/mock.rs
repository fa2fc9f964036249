//! Scriptable in-process driver for tests.
//!
//! Accepts `mock:<anything>` URLs. Every connection it opens is tracked by a
//! [`MockConnectionState`] so tests can simulate server restarts, broken
//! links and failing closes, and count the calls that reached the driver.
//!
//! ```text
//! let driver = MockDriver::new();
//! registry.register("mock", Arc::new(driver.clone()));
//! ... open a connection through the pool ...
//! driver.connection(0).unwrap().kill();   // server recycled the connection
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::connection::{
    BufferedResultSet, Connection, Driver, PreparedStatement, ResultSet, Statement,
};
use crate::error::{DriverError, DriverResult};
use crate::properties::Properties;
use crate::types::{Metadata, Row, Value};

const URL_PREFIX: &str = "mock:";

#[derive(Default)]
struct DriverState {
    connects: AtomicU64,
    refuse: AtomicBool,
    fail_metadata: AtomicBool,
    open_closed: AtomicBool,
    no_transactions: AtomicBool,
    no_query_timeout: AtomicBool,
    connections: Mutex<Vec<Arc<MockConnectionState>>>,
    last_properties: Mutex<Option<Properties>>,
}

/// A driver whose connections are fully scriptable.
///
/// Clones share state, so a test can keep one clone for inspection and hand
/// another to the code under test.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<DriverState>,
}

impl MockDriver {
    /// A driver that supports transactions and statement timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections report `supports_transactions = false` and reject
    /// transaction calls with `Unsupported`.
    pub fn without_transactions(self) -> Self {
        self.state.no_transactions.store(true, Ordering::Relaxed);
        self
    }

    /// Statements reject timeout calls with `Unsupported`.
    pub fn without_query_timeout(self) -> Self {
        self.state.no_query_timeout.store(true, Ordering::Relaxed);
        self
    }

    /// Make subsequent `connect` calls fail with "connection refused".
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::Relaxed);
    }

    /// Make `metadata()` fail on every connection.
    pub fn fail_metadata(&self, fail: bool) {
        self.state.fail_metadata.store(fail, Ordering::Relaxed);
    }

    /// New connections report closed from the start, while their metadata
    /// and statements keep working.
    pub fn open_closed(&self, closed: bool) {
        self.state.open_closed.store(closed, Ordering::Relaxed);
    }

    /// Number of successful connects.
    pub fn connects(&self) -> u64 {
        self.state.connects.load(Ordering::Relaxed)
    }

    /// The `index`-th connection opened (zero-based, in open order).
    pub fn connection(&self, index: usize) -> Option<Arc<MockConnectionState>> {
        self.connections().get(index).cloned()
    }

    pub fn connections(&self) -> Vec<Arc<MockConnectionState>> {
        self.state
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Properties passed to the most recent `connect`.
    pub fn last_properties(&self) -> Option<Properties> {
        self.state
            .last_properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with(URL_PREFIX)
    }

    fn connect(&self, url: &str, properties: &Properties) -> DriverResult<Box<dyn Connection>> {
        if !self.accepts_url(url) {
            return Err(DriverError::UnsupportedUrl {
                driver: self.name().to_string(),
                url: url.to_string(),
            });
        }
        if self.state.refuse.load(Ordering::Relaxed) {
            return Err(DriverError::Connect("connection refused".to_string()));
        }

        *self
            .state
            .last_properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(properties.clone());

        let id = self.state.connects.fetch_add(1, Ordering::Relaxed) + 1;
        let conn = Arc::new(MockConnectionState::new(id));
        conn.stale
            .store(self.state.open_closed.load(Ordering::Relaxed), Ordering::Relaxed);
        self.state
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&conn));

        Ok(Box::new(MockConnection {
            state: conn,
            driver: Arc::clone(&self.state),
        }))
    }
}

// ── Per-connection state ─────────────────────────────────────────────

/// Observable, scriptable state of one mock connection.
#[derive(Debug)]
pub struct MockConnectionState {
    id: u64,
    closed: AtomicBool,
    broken: AtomicBool,
    stale: AtomicBool,
    fail_close: AtomicBool,
    fail_is_closed: AtomicBool,
    auto_commit: AtomicBool,
    close_calls: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    auto_commit_changes: AtomicU64,
    queries: Mutex<Vec<String>>,
}

impl MockConnectionState {
    fn new(id: u64) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            stale: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            fail_is_closed: AtomicBool::new(false),
            auto_commit: AtomicBool::new(true),
            close_calls: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            auto_commit_changes: AtomicU64::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// One-based open ordinal.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Simulate the server dropping the connection: it reports closed and
    /// every statement fails.
    pub fn kill(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// Simulate a dead link the driver has not noticed: it still reports
    /// open, but every statement fails.
    pub fn sever(&self) {
        self.broken.store(true, Ordering::Relaxed);
    }

    /// Make `close()` fail from now on.
    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::Relaxed);
    }

    /// Make `is_closed()` fail from now on. Statements are unaffected.
    pub fn fail_is_closed(&self, fail: bool) {
        self.fail_is_closed.store(fail, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Calls to `close()` that reached the driver.
    pub fn close_calls(&self) -> u64 {
        self.close_calls.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    pub fn auto_commit_changes(&self) -> u64 {
        self.auto_commit_changes.load(Ordering::Relaxed)
    }

    /// SQL executed on this connection, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn run(&self, sql: &str) -> DriverResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(DriverError::Closed);
        }
        if self.broken.load(Ordering::Relaxed) {
            return Err(DriverError::Connect("connection reset by peer".to_string()));
        }
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sql.to_string());
        Ok(())
    }
}

struct MockConnection {
    state: Arc<MockConnectionState>,
    driver: Arc<DriverState>,
}

impl MockConnection {
    fn ensure_open(&self) -> DriverResult<()> {
        if self.state.closed.load(Ordering::Relaxed) {
            return Err(DriverError::Closed);
        }
        Ok(())
    }

    fn transactions_supported(&self) -> DriverResult<()> {
        if self.driver.no_transactions.load(Ordering::Relaxed) {
            return Err(DriverError::Unsupported("transactions"));
        }
        Ok(())
    }

    fn statement_timeout(&self) -> StatementTimeout {
        StatementTimeout {
            supported: !self.driver.no_query_timeout.load(Ordering::Relaxed),
            value: Duration::ZERO,
        }
    }
}

impl Connection for MockConnection {
    fn create_statement(&self) -> DriverResult<Box<dyn Statement + '_>> {
        self.ensure_open()?;
        Ok(Box::new(MockStatement {
            conn: Arc::clone(&self.state),
            timeout: self.statement_timeout(),
        }))
    }

    fn prepare_statement(&self, sql: &str) -> DriverResult<Box<dyn PreparedStatement + '_>> {
        self.ensure_open()?;
        Ok(Box::new(MockPreparedStatement {
            conn: Arc::clone(&self.state),
            sql: sql.to_string(),
            bindings: Vec::new(),
            timeout: self.statement_timeout(),
        }))
    }

    fn metadata(&self) -> DriverResult<Metadata> {
        self.ensure_open()?;
        if self.driver.fail_metadata.load(Ordering::Relaxed) {
            return Err(DriverError::Query("metadata unavailable".to_string()));
        }
        Ok(Metadata {
            product_name: "MockDB".to_string(),
            product_version: "1.0".to_string(),
            supports_transactions: !self.driver.no_transactions.load(Ordering::Relaxed),
        })
    }

    fn auto_commit(&self) -> DriverResult<bool> {
        self.ensure_open()?;
        Ok(self.state.auto_commit.load(Ordering::Relaxed))
    }

    fn set_auto_commit(&self, enabled: bool) -> DriverResult<()> {
        self.state.auto_commit_changes.fetch_add(1, Ordering::Relaxed);
        self.ensure_open()?;
        self.transactions_supported()?;
        self.state.auto_commit.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    fn commit(&self) -> DriverResult<()> {
        self.state.commits.fetch_add(1, Ordering::Relaxed);
        self.ensure_open()?;
        self.transactions_supported()
    }

    fn rollback(&self) -> DriverResult<()> {
        self.state.rollbacks.fetch_add(1, Ordering::Relaxed);
        self.ensure_open()?;
        self.transactions_supported()
    }

    fn is_closed(&self) -> DriverResult<bool> {
        if self.state.fail_is_closed.load(Ordering::Relaxed) {
            return Err(DriverError::Query("connection state unavailable".to_string()));
        }
        Ok(self.state.closed.load(Ordering::Relaxed) || self.state.stale.load(Ordering::Relaxed))
    }

    fn close(&self) -> DriverResult<()> {
        self.state.close_calls.fetch_add(1, Ordering::Relaxed);
        if self.state.fail_close.load(Ordering::Relaxed) {
            return Err(DriverError::Query(format!(
                "close failed for mock connection {}",
                self.state.id
            )));
        }
        self.state.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── Statements ───────────────────────────────────────────────────────

#[derive(Clone, Copy)]
struct StatementTimeout {
    supported: bool,
    value: Duration,
}

impl StatementTimeout {
    fn get(&self) -> DriverResult<Duration> {
        if !self.supported {
            return Err(DriverError::Unsupported("statement query timeout"));
        }
        Ok(self.value)
    }

    fn set(&mut self, timeout: Duration) -> DriverResult<()> {
        if !self.supported {
            return Err(DriverError::Unsupported("statement query timeout"));
        }
        self.value = timeout;
        Ok(())
    }
}

/// Every query answers a single row `[1]`.
fn one_row() -> BufferedResultSet {
    BufferedResultSet::new(vec!["1".to_string()], vec![Row::new(vec![Value::Integer(1)])])
}

struct MockStatement {
    conn: Arc<MockConnectionState>,
    timeout: StatementTimeout,
}

impl Statement for MockStatement {
    fn execute_query(&mut self, sql: &str) -> DriverResult<Box<dyn ResultSet + '_>> {
        self.conn.run(sql)?;
        Ok(Box::new(one_row()))
    }

    fn execute_update(&mut self, sql: &str) -> DriverResult<u64> {
        self.conn.run(sql)?;
        Ok(0)
    }

    fn query_timeout(&self) -> DriverResult<Duration> {
        self.timeout.get()
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> DriverResult<()> {
        self.timeout.set(timeout)
    }

    fn close(&mut self) -> DriverResult<()> {
        Ok(())
    }
}

struct MockPreparedStatement {
    conn: Arc<MockConnectionState>,
    sql: String,
    bindings: Vec<Value>,
    timeout: StatementTimeout,
}

impl PreparedStatement for MockPreparedStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&mut self, index: usize, value: Value) -> DriverResult<()> {
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
        self.conn.run(&self.sql)?;
        Ok(Box::new(one_row()))
    }

    fn execute_update(&mut self) -> DriverResult<u64> {
        self.conn.run(&self.sql)?;
        Ok(0)
    }

    fn query_timeout(&self) -> DriverResult<Duration> {
        self.timeout.get()
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> DriverResult<()> {
        self.timeout.set(timeout)
    }

    fn close(&mut self) -> DriverResult<()> {
        Ok(())
    }
}
