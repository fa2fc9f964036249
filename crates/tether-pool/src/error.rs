//! Error types for the connection cache.

use tether_driver::DriverError;
use thiserror::Error;

/// Result type alias for connection cache operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced to callers of the data source.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Bad driver identifier, missing url, unreadable config file.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Opening a connection failed.
    #[error("cannot open connection to {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: DriverError,
    },

    /// One or more handles failed to close during bulk shutdown. Carries the
    /// last failure encountered.
    #[error("{failed} of {attempted} connections failed to close; last failure on {connection}: {source}")]
    AggregatedClose {
        failed: usize,
        attempted: usize,
        connection: String,
        #[source]
        source: DriverError,
    },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

impl PoolError {
    pub(crate) fn connection(url: &str, source: DriverError) -> Self {
        Self::Connection {
            url: url.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_names_url_and_cause() {
        let err = PoolError::connection(
            "sqlite:/data/app.db",
            DriverError::Connect("unable to open database file".into()),
        );
        assert_eq!(
            err.to_string(),
            "cannot open connection to sqlite:/data/app.db: connect failed: unable to open database file"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn aggregated_close_message() {
        let err = PoolError::AggregatedClose {
            failed: 1,
            attempted: 3,
            connection: "#2 mock:db [worker-2]".into(),
            source: DriverError::Query("socket closed".into()),
        };
        assert_eq!(
            err.to_string(),
            "1 of 3 connections failed to close; last failure on #2 mock:db [worker-2]: query failed: socket closed"
        );
    }
}
