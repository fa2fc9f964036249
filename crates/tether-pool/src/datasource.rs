//! The application-facing data source.
//!
//! ```text
//! let ds = DataSource::builder()
//!     .driver("sqlite")
//!     .url("sqlite:/var/lib/app/app.db")
//!     .properties("busy_timeout=5000")
//!     .trace(true)
//!     .build()?;
//!
//! let conn = ds.get_connection()?;   // one per thread, reused
//! ...
//! ds.close()?;
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};

use tether_driver::{Driver, DriverRegistry};

use crate::config::{Configuration, DataSourceConfig};
use crate::error::{PoolError, PoolResult};
use crate::factory::ConnectionFactory;
use crate::guard::GuardedConnection;
use crate::listener::{ConnectionListener, Notifier, TracingListener};
use crate::owner::Owner;
use crate::probe::DEFAULT_PROBE_QUERY;
use crate::registry::{ConnectionRegistry, RegistryStats};

/// Collects data source settings and validates them in [`build`](Self::build).
pub struct DataSourceBuilder {
    driver: Option<String>,
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    properties: String,
    trace: bool,
    drivers: DriverRegistry,
    listeners: Vec<Arc<dyn ConnectionListener>>,
    probe_query: Option<String>,
}

impl Default for DataSourceBuilder {
    fn default() -> Self {
        Self {
            driver: None,
            url: None,
            username: None,
            password: None,
            properties: String::new(),
            trace: false,
            drivers: DriverRegistry::with_builtin(),
            listeners: Vec::new(),
            probe_query: None,
        }
    }
}

impl DataSourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a `[datasource]` table.
    pub fn from_config(config: &DataSourceConfig) -> Self {
        let mut builder = Self::new()
            .driver(config.driver.as_str())
            .url(config.url.as_str())
            .trace(config.trace);
        builder.username = config.username.clone();
        builder.password = config.password.clone();
        if let Some(properties) = &config.properties {
            builder.properties = properties.clone();
        }
        builder.probe_query = config.probe_query.clone();
        builder
    }

    /// Driver identifier, resolved against the driver registry at build time.
    pub fn driver(mut self, name: impl Into<String>) -> Self {
        self.driver = Some(name.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Raw `"k1=v1;k2=v2"` properties string.
    pub fn properties(mut self, raw: impl Into<String>) -> Self {
        self.properties = raw.into();
        self
    }

    /// Emit every lifecycle notification as a tracing event.
    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    /// Replace the driver registry.
    pub fn drivers(mut self, drivers: DriverRegistry) -> Self {
        self.drivers = drivers;
        self
    }

    pub fn register_driver(mut self, name: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        self.drivers.register(name, driver);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ConnectionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Query used by the liveness sweep. Defaults to `SELECT 1`.
    pub fn probe_query(mut self, query: impl Into<String>) -> Self {
        self.probe_query = Some(query.into());
        self
    }

    pub fn build(self) -> PoolResult<DataSource> {
        let name = self
            .driver
            .ok_or_else(|| PoolError::Configuration("driver is required".to_string()))?;
        let driver = self
            .drivers
            .load(&name)
            .map_err(|e| PoolError::Configuration(e.to_string()))?;
        let url = self
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| PoolError::Configuration("url is required".to_string()))?;

        let mut listeners = self.listeners;
        if self.trace {
            listeners.insert(0, Arc::new(TracingListener));
        }

        let config = Configuration::new(url, self.username, self.password, self.properties);
        tracing::debug!(driver = %name, url = %config.url(), trace = self.trace, "data source configured");
        Ok(DataSource {
            driver,
            config: Arc::new(config),
            notifier: Notifier::new(listeners),
            probe_query: self
                .probe_query
                .unwrap_or_else(|| DEFAULT_PROBE_QUERY.to_string()),
            trace: self.trace,
            registry: OnceLock::new(),
        })
    }
}

impl fmt::Debug for DataSourceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceBuilder")
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("trace", &self.trace)
            .field("drivers", &self.drivers)
            .finish_non_exhaustive()
    }
}

/// Hands each owner its own cached connection.
///
/// The underlying [`ConnectionRegistry`] is created on first use.
pub struct DataSource {
    driver: Arc<dyn Driver>,
    config: Arc<Configuration>,
    notifier: Notifier,
    probe_query: String,
    trace: bool,
    registry: OnceLock<ConnectionRegistry>,
}

impl DataSource {
    pub fn builder() -> DataSourceBuilder {
        DataSourceBuilder::new()
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Query the liveness sweep runs against each cached connection.
    pub fn probe_query(&self) -> &str {
        &self.probe_query
    }

    /// Whether lifecycle events go to the `tether::trace` target.
    pub fn traces(&self) -> bool {
        self.trace
    }

    fn registry(&self) -> &ConnectionRegistry {
        self.registry.get_or_init(|| {
            tracing::debug!(driver = %self.driver.name(), url = %self.config.url(), "creating connection registry");
            let factory = ConnectionFactory::new(
                Arc::clone(&self.driver),
                Arc::clone(&self.config),
                self.notifier.clone(),
            );
            ConnectionRegistry::new(factory, self.notifier.clone(), self.probe_query.clone())
        })
    }

    /// The calling thread's connection.
    pub fn get_connection(&self) -> PoolResult<Arc<GuardedConnection>> {
        self.registry().get(&Owner::current())
    }

    /// `owner`'s connection.
    pub fn get_connection_for(&self, owner: &Owner) -> PoolResult<Arc<GuardedConnection>> {
        self.registry().get(owner)
    }

    /// Per-call credentials are not supported; credentials are fixed at
    /// build time.
    pub fn get_connection_with(
        &self,
        _username: &str,
        _password: &str,
    ) -> PoolResult<Arc<GuardedConnection>> {
        Err(PoolError::UnsupportedOperation(
            "get_connection_with: credentials are fixed when the data source is built",
        ))
    }

    /// Close every cached connection. A data source that never handed out a
    /// connection has nothing to close.
    pub fn close(&self) -> PoolResult<()> {
        match self.registry.get() {
            Some(registry) => registry.close(),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry
            .get()
            .map(ConnectionRegistry::stats)
            .unwrap_or_default()
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("driver", &self.driver.name())
            .field("config", &self.config)
            .field("probe_query", &self.probe_query)
            .field("registry", &self.registry.get())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.stats(), f)
    }
}
