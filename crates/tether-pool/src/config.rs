//! Connection configuration and the `tether.toml` file format.
//!
//! ```toml
//! [datasource]
//! driver = "sqlite"
//! url = "sqlite:/var/lib/app/app.db"
//! username = "app"
//! password = "secret"
//! properties = "busy_timeout=5000;foreign_keys=on"
//! trace = true
//! probe_query = "SELECT 1"
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tether_driver::Properties;

use crate::error::{PoolError, PoolResult};

/// Property key carrying the username to the driver.
pub const USER_KEY: &str = "user";
/// Property key carrying the password to the driver.
pub const PASSWORD_KEY: &str = "password";

/// Immutable connection settings shared by every handle a data source opens.
#[derive(Clone)]
pub struct Configuration {
    url: String,
    username: Option<String>,
    password: Option<String>,
    raw_properties: String,
    properties: Properties,
}

impl Configuration {
    pub fn new(
        url: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
        raw_properties: impl Into<String>,
    ) -> Self {
        let raw_properties = raw_properties.into();
        let properties = Properties::parse(&raw_properties);
        Self {
            url: url.into(),
            username,
            password,
            raw_properties,
            properties,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn raw_properties(&self) -> &str {
        &self.raw_properties
    }

    /// Properties parsed from the raw string, without credentials.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Properties handed to the driver: the parsed properties plus `user`
    /// and `password` when configured.
    pub fn connect_properties(&self) -> Properties {
        let mut props = self.properties.clone();
        if let Some(user) = &self.username {
            props.insert(USER_KEY, user.clone());
        }
        if let Some(password) = &self.password {
            props.insert(PASSWORD_KEY, password.clone());
        }
        props
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── tether.toml ──────────────────────────────────────────────────────

/// Top-level `tether.toml` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TetherConfig {
    pub datasource: DataSourceConfig,
}

/// The `[datasource]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSourceConfig {
    pub driver: String,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub properties: Option<String>,
    #[serde(default)]
    pub trace: bool,
    pub probe_query: Option<String>,
}

impl TetherConfig {
    pub fn from_file(path: &Path) -> PoolResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PoolError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| PoolError::Configuration(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml_string(&self) -> PoolResult<String> {
        toml::to_string_pretty(self).map_err(|e| PoolError::Configuration(e.to_string()))
    }
}
