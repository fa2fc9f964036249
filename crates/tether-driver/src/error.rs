//! Error types for the driver layer.

use thiserror::Error;

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors raised by drivers and the objects they produce.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    #[error("driver {driver} does not accept url {url}")]
    UnsupportedUrl { driver: String, url: String },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("connection is closed")]
    Closed,

    #[error("operation not supported by driver: {0}")]
    Unsupported(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
