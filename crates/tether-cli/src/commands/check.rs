//! `tether check`: connect, run the liveness probe and summarise the cache.
//!
//! With `--owners N`, N worker threads each open their own connection and
//! exit; the next `get_connection()` reclaims their connections, and the
//! summary before and after shows it.

use anyhow::{Result, bail};
use tether_pool::{Connection, DataSource, GuardedConnection, Statement};
use tracing::info;

pub fn check(ds: &DataSource, owners: usize) -> Result<()> {
    let conn = ds.get_connection()?;
    let metadata = conn.metadata()?;
    probe(&conn, ds.probe_query())?;

    println!("✓ Connected to {} {}", metadata.product_name, metadata.product_version);
    println!("  Driver: {}", ds.driver_name());
    println!("  URL: {}", ds.configuration().url());
    println!(
        "  Transactions: {}",
        if metadata.supports_transactions { "yes" } else { "no" }
    );
    println!("  Probe: {} ok", ds.probe_query());

    if owners == 0 {
        println!("  Data source: {ds}");
        return Ok(());
    }

    info!(owners, "opening connections from worker threads");
    let ids = run_workers(ds, owners)?;
    println!("✓ {} worker connections opened (ids {:?})", ids.len(), ids);
    println!("  Before reclamation: {ds}");
    ds.get_connection()?;
    println!("  After reclamation:  {ds}");
    Ok(())
}

/// Open and probe one connection per worker thread. Returns their ids once
/// every worker has exited.
fn run_workers(ds: &DataSource, owners: usize) -> Result<Vec<u64>> {
    std::thread::scope(|s| {
        let mut workers = Vec::with_capacity(owners);
        for i in 0..owners {
            let worker = std::thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn_scoped(s, move || -> Result<u64> {
                    let conn = ds.get_connection()?;
                    probe(&conn, ds.probe_query())?;
                    Ok(conn.id())
                })?;
            workers.push(worker);
        }

        let mut ids = Vec::with_capacity(owners);
        for worker in workers {
            match worker.join() {
                Ok(id) => ids.push(id?),
                Err(_) => bail!("worker thread panicked"),
            }
        }
        Ok(ids)
    })
}

fn probe(conn: &GuardedConnection, sql: &str) -> Result<()> {
    let mut stmt = conn.statement()?;
    let mut rs = stmt.execute_query(sql)?;
    rs.rows()?;
    Ok(())
}
