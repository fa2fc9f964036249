//! tether-driver: the driver layer underneath the tether connection cache.
//!
//! - **connection**: object-safe `Driver` / `Connection` / `Statement` /
//!   `PreparedStatement` / `ResultSet` traits
//! - **registry**: resolve driver identifiers to driver instances
//! - **properties**: `"k1=v1;k2=v2"` connection properties
//! - **sqlite**: built-in `rusqlite` driver (feature `sqlite`, on by default)
//! - **mock**: scriptable driver for tests (feature `mock`)

pub mod connection;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod properties;
pub mod registry;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod types;

pub use connection::{BufferedResultSet, Connection, Driver, PreparedStatement, ResultSet, Statement};
pub use error::{DriverError, DriverResult};
pub use properties::Properties;
pub use registry::DriverRegistry;
pub use types::{Metadata, Row, Value};
