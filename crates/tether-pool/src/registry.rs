//! The owner → connection map.
//!
//! # Architecture
//!
//! ```text
//! get(owner)
//!   │ lock
//!   ├─ drain reclamation queue ──► remove + close dead owners' handles
//!   ├─ entry for owner? ── no ──► ConnectionFactory::open ──► insert
//!   ├─ is_closed()? ── no ──► return handle
//!   │        └─ yes ─► probe every entry ──► remove + close broken ones
//!   │                  remove owner's entry, open once more
//!   └ unlock
//! ```
//!
//! A single mutex serializes every mutation, including the sweep, which
//! performs driver I/O while the lock is held. Handles already given out
//! remain usable by their owners while the lock is held by someone else.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tether_driver::{Connection, DriverError};

use crate::error::{PoolError, PoolResult};
use crate::factory::ConnectionFactory;
use crate::guard::GuardedConnection;
use crate::listener::Notifier;
use crate::owner::{Owner, OwnerId, ReclamationQueue};
use crate::probe::probe;

struct Entry {
    owner_name: String,
    handle: Arc<GuardedConnection>,
}

struct RegistryState {
    entries: HashMap<OwnerId, Entry>,
    queue: ReclamationQueue,
}

/// Caches one [`GuardedConnection`] per live [`Owner`].
pub struct ConnectionRegistry {
    factory: ConnectionFactory,
    notifier: Notifier,
    probe_query: String,
    state: Mutex<RegistryState>,
}

/// Point-in-time view of a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Handles opened over the registry's lifetime.
    pub opened: u64,
    /// Handles currently cached.
    pub active: usize,
    /// Names of the owners holding them, sorted.
    pub owners: Vec<String>,
}

impl fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "opened={}, active={}, threads=[{}]",
            self.opened,
            self.active,
            self.owners.join(", ")
        )
    }
}

impl ConnectionRegistry {
    pub(crate) fn new(factory: ConnectionFactory, notifier: Notifier, probe_query: String) -> Self {
        Self {
            factory,
            notifier,
            probe_query,
            state: Mutex::new(RegistryState {
                entries: HashMap::new(),
                queue: ReclamationQueue::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return `owner`'s connection, opening one if needed.
    ///
    /// Repeated calls return the same handle until it is evicted. If the
    /// cached handle reports closed, every cached handle is probed, broken
    /// ones are closed, and a fresh handle is opened for `owner`.
    pub fn get(&self, owner: &Owner) -> PoolResult<Arc<GuardedConnection>> {
        let mut state = self.lock();
        self.reclaim_dead_owners(&mut state);

        loop {
            let (handle, cached) = match state.entries.get(&owner.id()) {
                Some(entry) => (Arc::clone(&entry.handle), true),
                None => {
                    let handle = self.factory.open(owner, state.queue.sender())?;
                    state.entries.insert(
                        owner.id(),
                        Entry {
                            owner_name: owner.name().to_string(),
                            handle: Arc::clone(&handle),
                        },
                    );
                    (handle, false)
                }
            };

            if !reports_closed(&handle) {
                if cached {
                    tracing::debug!(connection = %handle, owner = %owner.name(), "reusing cached connection");
                    self.notifier.connection_reused(handle.description());
                }
                return Ok(handle);
            }

            if !cached {
                state.entries.remove(&owner.id());
                if let Err(e) = handle.close_underlying() {
                    tracing::debug!(connection = %handle, error = %e, "close of stillborn connection failed");
                }
                return Err(PoolError::connection(
                    self.factory.configuration().url(),
                    DriverError::Closed,
                ));
            }

            tracing::warn!(connection = %handle, owner = %owner.name(), "cached connection is closed, sweeping registry");
            self.sweep(&mut state);
            if let Some(entry) = state.entries.remove(&owner.id()) {
                if let Err(e) = entry.handle.close_underlying() {
                    tracing::debug!(connection = %entry.handle, error = %e, "close of closed connection failed");
                }
                self.notifier
                    .broken_connection_closed(entry.handle.description());
            }
        }
    }

    /// Close every cached connection, in opening order.
    ///
    /// All handles are attempted and the map is emptied even when some
    /// closes fail; the last failure is reported. The registry can be used
    /// again afterwards.
    pub fn close(&self) -> PoolResult<()> {
        let mut state = self.lock();
        let mut entries: Vec<Entry> = state.entries.drain().map(|(_, entry)| entry).collect();
        entries.sort_by_key(|entry| entry.handle.id());

        let attempted = entries.len();
        let mut failed = 0;
        let mut last_failure = None;
        for entry in entries {
            match entry.handle.close_underlying() {
                Ok(()) => {
                    tracing::info!(connection = %entry.handle, "closed connection");
                    self.notifier.connection_closed(entry.handle.description());
                }
                Err(e) => {
                    tracing::warn!(connection = %entry.handle, error = %e, "failed to close connection");
                    failed += 1;
                    last_failure = Some((entry.handle.description().to_string(), e));
                }
            }
        }

        match last_failure {
            None => Ok(()),
            Some((connection, source)) => Err(PoolError::AggregatedClose {
                failed,
                attempted,
                connection,
                source,
            }),
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.lock();
        let mut owners: Vec<String> = state
            .entries
            .values()
            .map(|entry| entry.owner_name.clone())
            .collect();
        owners.sort();
        RegistryStats {
            opened: self.factory.opened(),
            active: state.entries.len(),
            owners,
        }
    }

    fn reclaim_dead_owners(&self, state: &mut RegistryState) {
        for id in state.queue.drain() {
            let Some(entry) = state.entries.remove(&id) else {
                continue;
            };
            match entry.handle.close_underlying() {
                Ok(()) => {
                    tracing::info!(connection = %entry.handle, owner = %id, "closed connection of dead owner");
                    self.notifier
                        .dead_owner_connection_closed(entry.handle.description());
                }
                Err(e) => {
                    tracing::warn!(connection = %entry.handle, owner = %id, error = %e, "failed to close connection of dead owner");
                }
            }
        }
    }

    fn sweep(&self, state: &mut RegistryState) {
        let mut probed: Vec<(OwnerId, Arc<GuardedConnection>)> = state
            .entries
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(&entry.handle)))
            .collect();
        probed.sort_by_key(|(_, handle)| handle.id());

        for (id, handle) in probed {
            let Err(e) = probe(&handle, &self.probe_query) else {
                continue;
            };
            tracing::warn!(error = %e, "evicting broken connection");
            state.entries.remove(&id);
            if let Err(close_err) = handle.close_underlying() {
                tracing::debug!(connection = %handle, error = %close_err, "close of broken connection failed");
            }
            self.notifier.broken_connection_closed(handle.description());
        }
    }
}

/// A driver error while asking counts as closed.
fn reports_closed(handle: &GuardedConnection) -> bool {
    handle.is_closed().unwrap_or_else(|e| {
        tracing::debug!(connection = %handle, error = %e, "is_closed failed, treating as closed");
        true
    })
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("factory", &self.factory)
            .field("listeners", &self.notifier.len())
            .field("probe_query", &self.probe_query)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.stats(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::listener::{ConnectionListener, RecordingListener};
    use crate::probe::DEFAULT_PROBE_QUERY;
    use tether_driver::mock::MockDriver;

    struct Fixture {
        driver: MockDriver,
        recorder: Arc<RecordingListener>,
        registry: ConnectionRegistry,
    }

    fn fixture() -> Fixture {
        fixture_with(MockDriver::new())
    }

    fn fixture_with(driver: MockDriver) -> Fixture {
        let recorder = Arc::new(RecordingListener::default());
        let listeners: Vec<Arc<dyn ConnectionListener>> = vec![recorder.clone()];
        let notifier = Notifier::new(listeners);
        let factory = ConnectionFactory::new(
            Arc::new(driver.clone()),
            Arc::new(Configuration::new("mock:db", None, None, "")),
            notifier.clone(),
        );
        let registry = ConnectionRegistry::new(factory, notifier, DEFAULT_PROBE_QUERY.to_string());
        Fixture {
            driver,
            recorder,
            registry,
        }
    }

    // ── caching ─────────────────────────────────────────────────────

    #[test]
    fn same_owner_gets_same_handle() {
        let f = fixture();
        let owner = Owner::new("main");
        let first = f.registry.get(&owner).unwrap();
        let second = f.registry.get(&owner).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.id(), second.id());
        assert_eq!(f.registry.stats().opened, 1);
        assert_eq!(f.recorder.count("connection_opened"), 1);
        assert_eq!(f.recorder.count("connection_reused"), 1);
    }

    #[test]
    fn different_owners_get_different_handles() {
        let f = fixture();
        let a = Owner::new("a");
        let b = Owner::new("b");
        let ha = f.registry.get(&a).unwrap();
        let hb = f.registry.get(&b).unwrap();
        assert_ne!(ha.id(), hb.id());
        assert_eq!(
            f.registry.stats(),
            RegistryStats {
                opened: 2,
                active: 2,
                owners: vec!["a".into(), "b".into()],
            }
        );
    }

    #[test]
    fn handle_close_does_not_evict() {
        let f = fixture();
        let owner = Owner::new("main");
        let first = f.registry.get(&owner).unwrap();
        first.close().unwrap();
        let second = f.registry.get(&owner).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn open_failure_leaves_no_entry() {
        let f = fixture();
        f.driver.refuse_connections(true);
        let owner = Owner::new("main");
        assert!(matches!(f.registry.get(&owner), Err(PoolError::Connection { .. })));
        assert_eq!(f.registry.stats().active, 0);

        f.driver.refuse_connections(false);
        assert_eq!(f.registry.get(&owner).unwrap().id(), 1);
    }

    // ── liveness ────────────────────────────────────────────────────

    #[test]
    fn closed_handle_is_replaced() {
        let f = fixture();
        let owner = Owner::new("main");
        let old = f.registry.get(&owner).unwrap();
        f.driver.connection(0).unwrap().kill();

        let new = f.registry.get(&owner).unwrap();
        assert_ne!(old.id(), new.id());
        assert_eq!(new.id(), 2);
        assert_eq!(f.registry.stats().opened, 2);
        assert_eq!(f.registry.stats().active, 1);
        assert!(old.is_closed().unwrap());
        assert_eq!(f.recorder.count("broken_connection_closed"), 1);
        assert_eq!(f.recorder.count("connection_reused"), 0);
    }

    #[test]
    fn handle_closed_at_birth_is_an_error() {
        let f = fixture();
        f.driver.open_closed(true);
        let owner = Owner::new("main");

        let err = f.registry.get(&owner).unwrap_err();
        assert!(matches!(
            err,
            PoolError::Connection { source: DriverError::Closed, .. }
        ));
        assert_eq!(f.registry.stats().active, 0);
        assert_eq!(f.driver.connection(0).unwrap().close_calls(), 1);
        assert_eq!(f.recorder.count("broken_connection_closed"), 0);

        f.driver.open_closed(false);
        assert_eq!(f.registry.get(&owner).unwrap().id(), 2);
    }

    #[test]
    fn is_closed_error_counts_as_closed() {
        let f = fixture();
        let a = Owner::new("a");
        let b = Owner::new("b");
        let old = f.registry.get(&a).unwrap();
        f.registry.get(&b).unwrap();
        f.driver.connection(1).unwrap().sever();
        f.driver.connection(0).unwrap().fail_is_closed(true);

        let new = f.registry.get(&a).unwrap();
        assert_ne!(old.id(), new.id());
        assert_eq!(new.id(), 3);
        // the sweep ran: b's severed link is gone as well
        assert_eq!(f.registry.stats().owners, vec!["a".to_string()]);
        assert_eq!(f.driver.connection(0).unwrap().close_calls(), 1);
        assert_eq!(f.driver.connection(1).unwrap().close_calls(), 1);
        assert_eq!(f.recorder.count("broken_connection_closed"), 2);
        assert_eq!(f.recorder.count("connection_reused"), 0);
    }

    #[test]
    fn sweep_evicts_other_broken_entries() {
        let f = fixture();
        let a = Owner::new("a");
        let b = Owner::new("b");
        let c = Owner::new("c");
        f.registry.get(&a).unwrap();
        let hb = f.registry.get(&b).unwrap();
        let hc = f.registry.get(&c).unwrap();

        // b's link is dead but its driver has not noticed; a is closed.
        f.driver.connection(1).unwrap().sever();
        f.driver.connection(0).unwrap().kill();

        let fresh = f.registry.get(&a).unwrap();
        assert_eq!(fresh.id(), 4);
        assert_eq!(f.driver.connection(1).unwrap().close_calls(), 1);
        assert_eq!(f.driver.connection(2).unwrap().close_calls(), 0);
        assert_eq!(
            f.registry.stats().owners,
            vec!["a".to_string(), "c".to_string()]
        );
        assert_eq!(f.recorder.count("broken_connection_closed"), 2);

        // b gets a fresh handle; c keeps its own.
        assert_ne!(f.registry.get(&b).unwrap().id(), hb.id());
        assert!(Arc::ptr_eq(&f.registry.get(&c).unwrap(), &hc));
    }

    #[test]
    fn broken_close_failures_are_suppressed() {
        let f = fixture();
        let a = Owner::new("a");
        let b = Owner::new("b");
        f.registry.get(&a).unwrap();
        f.registry.get(&b).unwrap();
        let b_state = f.driver.connection(1).unwrap();
        b_state.sever();
        b_state.fail_close(true);
        f.driver.connection(0).unwrap().kill();

        assert_eq!(f.registry.get(&a).unwrap().id(), 3);
        assert_eq!(f.registry.stats().owners, vec!["a".to_string()]);
    }

    #[test]
    fn reopen_failure_after_eviction_surfaces() {
        let f = fixture();
        let owner = Owner::new("main");
        f.registry.get(&owner).unwrap();
        f.driver.connection(0).unwrap().kill();
        f.driver.refuse_connections(true);

        assert!(matches!(f.registry.get(&owner), Err(PoolError::Connection { .. })));
        assert_eq!(f.registry.stats().active, 0);
    }

    #[test]
    fn custom_probe_query_is_used_in_sweep() {
        let driver = MockDriver::new();
        let notifier = Notifier::default();
        let factory = ConnectionFactory::new(
            Arc::new(driver.clone()),
            Arc::new(Configuration::new("mock:db", None, None, "")),
            notifier.clone(),
        );
        let registry = ConnectionRegistry::new(factory, notifier, "SELECT 1 FROM dual".to_string());
        let a = Owner::new("a");
        let b = Owner::new("b");
        registry.get(&a).unwrap();
        registry.get(&b).unwrap();
        driver.connection(0).unwrap().kill();

        registry.get(&a).unwrap();
        assert_eq!(driver.connection(1).unwrap().queries(), vec!["SELECT 1 FROM dual"]);
    }

    // ── dead owners ─────────────────────────────────────────────────

    #[test]
    fn dead_owner_is_reclaimed_once() {
        let f = fixture();
        let survivor = Owner::new("survivor");
        let doomed = Owner::new("doomed");
        f.registry.get(&survivor).unwrap();
        f.registry.get(&doomed).unwrap();
        drop(doomed);

        f.registry.get(&survivor).unwrap();
        f.registry.get(&survivor).unwrap();

        assert_eq!(f.driver.connection(1).unwrap().close_calls(), 1);
        assert_eq!(f.recorder.count("dead_owner_connection_closed"), 1);
        assert_eq!(f.registry.stats().owners, vec!["survivor".to_string()]);
    }

    #[test]
    fn dead_owner_close_failure_does_not_stop_drain() {
        let f = fixture();
        let survivor = Owner::new("survivor");
        let first = Owner::new("first");
        let second = Owner::new("second");
        f.registry.get(&first).unwrap();
        f.registry.get(&second).unwrap();
        f.driver.connection(0).unwrap().fail_close(true);
        drop(first);
        drop(second);

        f.registry.get(&survivor).unwrap();
        assert_eq!(f.registry.stats().owners, vec!["survivor".to_string()]);
        assert_eq!(f.recorder.count("dead_owner_connection_closed"), 1);
        assert_eq!(f.driver.connection(1).unwrap().close_calls(), 1);
    }

    #[test]
    fn exited_thread_is_reclaimed() {
        let f = fixture();
        std::thread::scope(|s| {
            s.spawn(|| {
                f.registry.get(&Owner::current()).unwrap();
            })
            .join()
            .unwrap();
        });
        assert_eq!(f.registry.stats().active, 1);

        let main = Owner::new("main");
        f.registry.get(&main).unwrap();
        assert_eq!(f.registry.stats().owners, vec!["main".to_string()]);
        assert_eq!(f.driver.connection(0).unwrap().close_calls(), 1);
    }

    // ── bulk close ──────────────────────────────────────────────────

    #[test]
    fn close_reports_last_failure_and_empties_map() {
        let f = fixture();
        let owners: Vec<Owner> = (1..=3).map(|i| Owner::new(format!("w{i}"))).collect();
        for owner in &owners {
            f.registry.get(owner).unwrap();
        }
        f.driver.connection(1).unwrap().fail_close(true);

        let err = f.registry.close().unwrap_err();
        match err {
            PoolError::AggregatedClose {
                failed,
                attempted,
                connection,
                source,
            } => {
                assert_eq!((failed, attempted), (1, 3));
                assert_eq!(connection, "#2 mock:db [w2]");
                assert!(source.to_string().contains("mock connection 2"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(f.driver.connection(0).unwrap().is_closed());
        assert!(!f.driver.connection(1).unwrap().is_closed());
        assert!(f.driver.connection(2).unwrap().is_closed());
        assert_eq!(f.registry.stats().active, 0);
        assert_eq!(f.recorder.count("connection_closed"), 2);
    }

    #[test]
    fn close_keeps_the_last_of_several_failures() {
        let f = fixture();
        let owners: Vec<Owner> = (1..=3).map(|i| Owner::new(format!("w{i}"))).collect();
        for owner in &owners {
            f.registry.get(owner).unwrap();
        }
        f.driver.connection(0).unwrap().fail_close(true);
        f.driver.connection(2).unwrap().fail_close(true);

        let err = f.registry.close().unwrap_err();
        assert!(matches!(
            err,
            PoolError::AggregatedClose { failed: 2, attempted: 3, ref connection, .. }
                if connection == "#3 mock:db [w3]"
        ));
    }

    #[test]
    fn registry_is_reusable_after_close() {
        let f = fixture();
        let owner = Owner::new("main");
        let before = f.registry.get(&owner).unwrap();
        f.registry.close().unwrap();
        assert!(before.is_closed().unwrap());

        let after = f.registry.get(&owner).unwrap();
        assert_eq!(after.id(), 2);
        assert!(!after.is_closed().unwrap());
    }

    #[test]
    fn close_on_empty_registry_is_ok() {
        let f = fixture();
        f.registry.close().unwrap();
        assert_eq!(f.registry.to_string(), "opened=0, active=0, threads=[]");
    }

    #[test]
    fn display_lists_owners() {
        let f = fixture();
        let b = Owner::new("beta");
        let a = Owner::new("alpha");
        f.registry.get(&b).unwrap();
        f.registry.get(&a).unwrap();
        assert_eq!(f.registry.to_string(), "opened=2, active=2, threads=[alpha, beta]");
    }
}
