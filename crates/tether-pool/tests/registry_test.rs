//! Connection cache behaviour through the public `DataSource` API, driven by
//! the scriptable mock driver.
//!
//! The test stack: `DataSource` → `ConnectionRegistry` → `ConnectionFactory` → `MockDriver`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, Once};

use tether_driver::mock::MockDriver;
use tether_pool::{Connection, ConnectionListener, DataSource, Owner, PoolError};

// ── Tracing setup ────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Controlled by `RUST_LOG` (e.g. `RUST_LOG=tether_pool=debug`).
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Helpers ──────────────────────────────────────────────────────

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
    reclaimed: AtomicUsize,
}

impl EventLog {
    fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

impl ConnectionListener for EventLog {
    fn connection_opened(&self, description: &str) {
        self.events.lock().unwrap().push(format!("opened {description}"));
    }

    fn connection_reused(&self, description: &str) {
        self.events.lock().unwrap().push(format!("reused {description}"));
    }

    fn dead_owner_connection_closed(&self, description: &str) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
        self.events.lock().unwrap().push(format!("reclaimed {description}"));
    }

    fn broken_connection_closed(&self, description: &str) {
        self.events.lock().unwrap().push(format!("broken {description}"));
    }
}

fn data_source(driver: &MockDriver, log: &Arc<EventLog>) -> DataSource {
    init_tracing();
    DataSource::builder()
        .register_driver("mock", Arc::new(driver.clone()))
        .driver("mock")
        .url("mock:orders")
        .trace(true)
        .listener(log.clone())
        .build()
        .unwrap()
}

// ── Identity ─────────────────────────────────────────────────────

#[test]
fn repeated_gets_share_one_handle() {
    let driver = MockDriver::new();
    let log = Arc::new(EventLog::default());
    let ds = data_source(&driver, &log);

    let first = ds.get_connection().unwrap();
    for _ in 0..5 {
        let again = ds.get_connection().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }
    assert_eq!(ds.stats().opened, 1);
    assert_eq!(driver.connects(), 1);
    assert_eq!(log.count("reused"), 5);
}

#[test]
fn handle_survives_application_close() {
    let driver = MockDriver::new();
    let log = Arc::new(EventLog::default());
    let ds = data_source(&driver, &log);

    let conn = ds.get_connection().unwrap();
    conn.close().unwrap();
    assert!(!conn.is_closed().unwrap());
    assert_eq!(ds.get_connection().unwrap().id(), conn.id());
}

// ── Recovery ─────────────────────────────────────────────────────

#[test]
fn externally_closed_handle_is_replaced() {
    let driver = MockDriver::new();
    let log = Arc::new(EventLog::default());
    let ds = data_source(&driver, &log);
    let owner = Owner::new("A");

    let old = ds.get_connection_for(&owner).unwrap();
    driver.connection(0).unwrap().kill();

    let new = ds.get_connection_for(&owner).unwrap();
    assert_ne!(old.id(), new.id());
    assert_eq!(ds.stats().opened, 2);
    assert!(old.is_closed().unwrap());
    assert_eq!(ds.stats().active, 1);
    assert_eq!(log.count("broken #1 mock:orders [A]"), 1);
}

#[test]
fn sweep_spares_healthy_owners() {
    let driver = MockDriver::new();
    let log = Arc::new(EventLog::default());
    let ds = data_source(&driver, &log);
    let owners: Vec<Owner> = ["a", "b", "c", "d"].into_iter().map(Owner::new).collect();
    let handles: Vec<_> = owners
        .iter()
        .map(|o| ds.get_connection_for(o).unwrap())
        .collect();

    driver.connection(2).unwrap().sever();
    driver.connection(3).unwrap().kill();

    // d notices first; c is caught by the sweep.
    let d = ds.get_connection_for(&owners[3]).unwrap();
    assert_eq!(d.id(), 5);
    assert_eq!(log.count("broken"), 2);
    assert_eq!(ds.stats().owners, vec!["a", "b", "d"]);
    assert!(Arc::ptr_eq(&ds.get_connection_for(&owners[0]).unwrap(), &handles[0]));
    assert!(Arc::ptr_eq(&ds.get_connection_for(&owners[1]).unwrap(), &handles[1]));
}

#[test]
fn refused_reconnect_surfaces_connection_error() {
    let driver = MockDriver::new();
    let log = Arc::new(EventLog::default());
    let ds = data_source(&driver, &log);

    ds.get_connection().unwrap();
    driver.connection(0).unwrap().kill();
    driver.refuse_connections(true);

    let err = ds.get_connection().unwrap_err();
    assert!(matches!(err, PoolError::Connection { ref url, .. } if url == "mock:orders"));

    driver.refuse_connections(false);
    assert_eq!(ds.get_connection().unwrap().id(), 2);
}

// ── Dead owners ──────────────────────────────────────────────────

#[test]
fn finished_threads_are_reclaimed_exactly_once() {
    let driver = MockDriver::new();
    let log = Arc::new(EventLog::default());
    let ds = Arc::new(data_source(&driver, &log));
    // Workers stay alive until all four hold a connection.
    let all_open = Arc::new(Barrier::new(4));

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let ds = Arc::clone(&ds);
            let all_open = Arc::clone(&all_open);
            std::thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || {
                    let id = ds.get_connection().unwrap().id();
                    all_open.wait();
                    id
                })
                .unwrap()
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(ds.stats().active, 4);

    ds.get_connection().unwrap();
    ds.get_connection().unwrap();

    assert_eq!(log.reclaimed.load(Ordering::Relaxed), 4);
    assert_eq!(ds.stats().active, 1);
    for conn in driver.connections().iter().take(4) {
        assert_eq!(conn.close_calls(), 1);
    }
}

#[test]
fn dropped_explicit_owner_is_reclaimed() {
    let driver = MockDriver::new();
    let log = Arc::new(EventLog::default());
    let ds = data_source(&driver, &log);

    let job = Owner::new("nightly-job");
    let conn = ds.get_connection_for(&job).unwrap();
    drop(job);
    assert_eq!(ds.stats().owners, vec!["nightly-job"]);

    ds.get_connection_for(&Owner::new("next")).unwrap();
    assert_eq!(ds.stats().owners, vec!["next"]);
    assert!(conn.is_closed().unwrap());
    assert_eq!(log.count("reclaimed #1 mock:orders [nightly-job]"), 1);
}

// ── Bulk close ───────────────────────────────────────────────────

#[test]
fn close_aggregates_failures_and_empties_cache() {
    let driver = MockDriver::new();
    let log = Arc::new(EventLog::default());
    let ds = data_source(&driver, &log);
    let owners: Vec<Owner> = ["one", "two", "three"].into_iter().map(Owner::new).collect();
    for owner in &owners {
        ds.get_connection_for(owner).unwrap();
    }
    driver.connection(1).unwrap().fail_close(true);

    let err = ds.close().unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("1 of 3 connections failed to close"), "{message}");
    assert!(message.contains("#2 mock:orders [two]"), "{message}");
    assert!(message.contains("close failed for mock connection 2"), "{message}");

    assert!(driver.connection(0).unwrap().is_closed());
    assert!(driver.connection(2).unwrap().is_closed());
    assert_eq!(ds.stats().active, 0);
    assert_eq!(ds.to_string(), "opened=3, active=0, threads=[]");
}

// ── Concurrency ──────────────────────────────────────────────────

#[test]
fn concurrent_get_and_close_keep_the_map_consistent() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;

    let driver = MockDriver::new();
    let log = Arc::new(EventLog::default());
    let ds = Arc::new(data_source(&driver, &log));

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let ds = Arc::clone(&ds);
            std::thread::spawn(move || {
                for round in 0..ROUNDS {
                    let conn = ds.get_connection().unwrap();
                    assert!(conn.description().starts_with('#'));
                    if (round + t) % 10 == 0 {
                        // Another thread's close may race with ours; either
                        // outcome leaves the map empty.
                        let _ = ds.close();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let main = ds.get_connection().unwrap();
    let stats = ds.stats();
    assert_eq!(stats.active, 1, "{stats}");
    assert!(!main.is_closed().unwrap());
    assert!(stats.opened >= THREADS as u64);
}
