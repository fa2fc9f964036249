//! Liveness probing of cached connections.

use tether_driver::{Connection, DriverError};
use thiserror::Error;

use crate::guard::GuardedConnection;

/// Query used when the data source does not configure one.
pub const DEFAULT_PROBE_QUERY: &str = "SELECT 1";

/// A connection failed its liveness probe.
#[derive(Debug, Error)]
#[error("liveness probe failed on {connection}: {source}")]
pub(crate) struct LivenessError {
    pub(crate) connection: String,
    #[source]
    pub(crate) source: DriverError,
}

/// Run `query` on `conn` and consume its result.
pub(crate) fn probe(conn: &GuardedConnection, query: &str) -> Result<(), LivenessError> {
    run(conn, query).map_err(|source| LivenessError {
        connection: conn.description().to_string(),
        source,
    })
}

fn run(conn: &GuardedConnection, query: &str) -> Result<(), DriverError> {
    let mut stmt = conn.create_statement()?;
    {
        let mut rs = stmt.execute_query(query)?;
        rs.rows()?;
        rs.close()?;
    }
    stmt.close()
}
