//! tether-pool: owner-keyed database connection cache.
//!
//! Each owner (by default, each thread) gets one long-lived connection that
//! is reused on every call. Connections of owners that went away are closed
//! lazily, and a connection found closed triggers a liveness sweep of the
//! whole cache.
//! - **datasource**: `DataSource` facade and its builder
//! - **registry**: the owner → connection map, reclamation and liveness sweep
//! - **factory**: opens physical connections and wraps them
//! - **guard**: `GuardedConnection`, uniform behaviour over uneven drivers
//! - **owner**: owner identities and the reclamation queue
//! - **listener**: lifecycle notifications and the tracing listener
//! - **config**: connection configuration and `tether.toml`

pub mod config;
pub mod datasource;
pub mod error;
pub mod factory;
pub mod guard;
pub mod listener;
pub mod owner;
mod probe;
pub mod registry;

pub use config::{Configuration, DataSourceConfig, TetherConfig};
pub use datasource::{DataSource, DataSourceBuilder};
pub use error::{PoolError, PoolResult};
pub use factory::ConnectionFactory;
pub use guard::{GuardedConnection, GuardedPreparedStatement, GuardedStatement};
pub use listener::{ConnectionListener, TracingListener};
pub use owner::{Owner, OwnerId};
pub use probe::DEFAULT_PROBE_QUERY;
pub use registry::{ConnectionRegistry, RegistryStats};

pub use tether_driver::{
    Connection, Driver, DriverError, DriverRegistry, Metadata, PreparedStatement, Properties,
    ResultSet, Row, Statement, Value,
};
