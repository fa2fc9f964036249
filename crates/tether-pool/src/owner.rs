//! Owners: the execution contexts connections are cached against.
//!
//! An [`Owner`] is an explicit, cheaply clonable identity. The registry only
//! ever stores an owner's [`OwnerId`], never the owner itself, so the owner's
//! lifetime stays under application control. When the last clone of an owner
//! is dropped, its id is pushed onto the reclamation queue of every registry
//! watching it; the registry closes the orphaned connection on its next
//! `get()`. Cleanup is therefore best-effort and lazy, not timely.
//!
//! [`Owner::current()`] gives each thread its own owner, kept in a
//! thread-local slot that is dropped when the thread exits.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Owner = Owner::for_current_thread();
}

/// Process-unique owner identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner-{}", self.0)
    }
}

struct OwnerState {
    id: OwnerId,
    name: String,
    /// Reclamation queues to notify when this owner goes away.
    watchers: Mutex<Vec<UnboundedSender<OwnerId>>>,
}

impl Drop for OwnerState {
    fn drop(&mut self) {
        let watchers = self.watchers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for tx in watchers.drain(..) {
            // A closed queue means the registry is gone; nothing to reclaim.
            let _ = tx.send(self.id);
        }
    }
}

/// An execution context that can own at most one cached connection per
/// registry.
#[derive(Clone)]
pub struct Owner {
    state: Arc<OwnerState>,
}

impl Owner {
    pub fn new(name: impl Into<String>) -> Self {
        let id = OwnerId(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            state: Arc::new(OwnerState {
                id,
                name: name.into(),
                watchers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The calling thread's owner.
    ///
    /// Falls back to a fresh, unshared owner if called while the thread's
    /// locals are being torn down.
    pub fn current() -> Self {
        CURRENT
            .try_with(Owner::clone)
            .unwrap_or_else(|_| Owner::for_current_thread())
    }

    fn for_current_thread() -> Self {
        let thread = std::thread::current();
        let name = match thread.name() {
            Some(name) => name.to_string(),
            None => format!("{:?}", thread.id()),
        };
        Self::new(name)
    }

    pub fn id(&self) -> OwnerId {
        self.state.id
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Ask to be told on `queue` when this owner is dropped.
    ///
    /// Registering the same queue twice is a no-op.
    pub(crate) fn watch(&self, queue: &UnboundedSender<OwnerId>) {
        let mut watchers = self
            .state
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        watchers.retain(|tx| !tx.is_closed());
        if !watchers.iter().any(|tx| tx.same_channel(queue)) {
            watchers.push(queue.clone());
        }
    }
}

impl PartialEq for Owner {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Owner {}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("id", &self.state.id)
            .field("name", &self.state.name)
            .finish()
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.state.name)
    }
}

/// Queue of owners that have been dropped.
pub(crate) struct ReclamationQueue {
    tx: UnboundedSender<OwnerId>,
    rx: UnboundedReceiver<OwnerId>,
}

impl ReclamationQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self { tx, rx }
    }

    pub(crate) fn sender(&self) -> &UnboundedSender<OwnerId> {
        &self.tx
    }

    /// Take every notification currently queued, without blocking.
    pub(crate) fn drain(&mut self) -> Vec<OwnerId> {
        let mut dead = Vec::new();
        while let Ok(id) = self.rx.try_recv() {
            dead.push(id);
        }
        dead
    }
}
