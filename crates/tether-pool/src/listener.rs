//! Connection lifecycle notifications.
//!
//! Listeners are purely observational. They are invoked while the registry
//! lock is held, so they must return quickly and must not call back into
//! the data source.

use std::sync::Arc;

/// Receives lifecycle events. Every callback defaults to a no-op and
/// receives a human-readable description of the affected connection.
pub trait ConnectionListener: Send + Sync {
    /// Connection properties were resolved for a new connection.
    fn properties_applied(&self, _description: &str) {}

    fn connection_opened(&self, _description: &str) {}

    /// A cached connection was handed out again.
    fn connection_reused(&self, _description: &str) {}

    /// The connection of an owner that went away was closed.
    fn dead_owner_connection_closed(&self, _description: &str) {}

    /// A connection that failed its liveness probe was closed.
    fn broken_connection_closed(&self, _description: &str) {}

    /// A connection was closed during bulk shutdown.
    fn connection_closed(&self, _description: &str) {}
}

/// Emits every notification as a `tracing` event under `tether::trace`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl ConnectionListener for TracingListener {
    fn properties_applied(&self, description: &str) {
        tracing::info!(target: "tether::trace", connection = %description, "properties applied");
    }

    fn connection_opened(&self, description: &str) {
        tracing::info!(target: "tether::trace", connection = %description, "connection opened");
    }

    fn connection_reused(&self, description: &str) {
        tracing::info!(target: "tether::trace", connection = %description, "connection reused");
    }

    fn dead_owner_connection_closed(&self, description: &str) {
        tracing::info!(target: "tether::trace", connection = %description, "dead owner connection closed");
    }

    fn broken_connection_closed(&self, description: &str) {
        tracing::info!(target: "tether::trace", connection = %description, "broken connection closed");
    }

    fn connection_closed(&self, description: &str) {
        tracing::info!(target: "tether::trace", connection = %description, "connection closed");
    }
}

/// Fans notifications out to every configured listener.
#[derive(Clone, Default)]
pub(crate) struct Notifier {
    listeners: Vec<Arc<dyn ConnectionListener>>,
}

impl Notifier {
    pub(crate) fn new(listeners: Vec<Arc<dyn ConnectionListener>>) -> Self {
        Self { listeners }
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    fn each(&self, f: impl Fn(&dyn ConnectionListener)) {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }

    pub(crate) fn properties_applied(&self, description: &str) {
        self.each(|l| l.properties_applied(description));
    }

    pub(crate) fn connection_opened(&self, description: &str) {
        self.each(|l| l.connection_opened(description));
    }

    pub(crate) fn connection_reused(&self, description: &str) {
        self.each(|l| l.connection_reused(description));
    }

    pub(crate) fn dead_owner_connection_closed(&self, description: &str) {
        self.each(|l| l.dead_owner_connection_closed(description));
    }

    pub(crate) fn broken_connection_closed(&self, description: &str) {
        self.each(|l| l.broken_connection_closed(description));
    }

    pub(crate) fn connection_closed(&self, description: &str) {
        self.each(|l| l.connection_closed(description));
    }
}

/// Records every event as `"<event>: <description>"`, for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingListener {
    events: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingListener {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Events whose name matches `event`.
    pub(crate) fn count(&self, event: &str) -> usize {
        let prefix = format!("{event}:");
        self.events().iter().filter(|e| e.starts_with(&prefix)).count()
    }

    fn push(&self, event: &str, description: &str) {
        self.events.lock().unwrap().push(format!("{event}: {description}"));
    }
}

#[cfg(test)]
impl ConnectionListener for RecordingListener {
    fn properties_applied(&self, description: &str) {
        self.push("properties_applied", description);
    }

    fn connection_opened(&self, description: &str) {
        self.push("connection_opened", description);
    }

    fn connection_reused(&self, description: &str) {
        self.push("connection_reused", description);
    }

    fn dead_owner_connection_closed(&self, description: &str) {
        self.push("dead_owner_connection_closed", description);
    }

    fn broken_connection_closed(&self, description: &str) {
        self.push("broken_connection_closed", description);
    }

    fn connection_closed(&self, description: &str) {
        self.push("connection_closed", description);
    }
}
