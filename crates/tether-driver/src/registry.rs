//! Driver lookup by identifier.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::connection::Driver;
use crate::error::{DriverError, DriverResult};

/// Maps driver identifiers to driver instances.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the drivers compiled into this crate.
    pub fn with_builtin() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "sqlite")]
        registry.register("sqlite", Arc::new(crate::sqlite::SqliteDriver));
        registry
    }

    /// Register a driver under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, driver: Arc<dyn Driver>) {
        let name = name.into();
        tracing::debug!(driver = %name, "registered driver");
        self.drivers.insert(name, driver);
    }

    /// Resolve a driver identifier.
    pub fn load(&self, name: &str) -> DriverResult<Arc<dyn Driver>> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| DriverError::UnknownDriver(name.to_string()))
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
