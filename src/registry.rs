//! Listener registry
//!
//! Transport-independent store of event subscriptions. Registrations outlive
//! any single connection: after a reconnect the manager re-binds every entry
//! onto the fresh transport via [`ListenerRegistry::attach_all`], so
//! consumers keep receiving events without re-subscribing.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

/// Lifecycle event names delivered by the manager itself.
pub mod lifecycle {
    /// Transport open and authenticated.
    pub const CONNECT: &str = "connect";
    /// Transport dropped; carries a reason string.
    pub const DISCONNECT: &str = "disconnect";
    /// A connection attempt failed; carries an error string.
    pub const CONNECT_ERROR: &str = "connect_error";
    /// The retry budget is exhausted; carries an error string.
    pub const ERROR: &str = "error";
}

/// Event names that are never bound onto the transport.
///
/// These describe the connection's own lifecycle and are dispatched from the
/// manager's state transitions, so application payloads cannot shadow them.
pub const RESERVED_EVENTS: &[&str] = &[
    lifecycle::CONNECT,
    lifecycle::DISCONNECT,
    lifecycle::CONNECT_ERROR,
    lifecycle::ERROR,
];

/// Callback invoked with the event's positional arguments.
pub type EventHandler = dyn Fn(&[Value]) + Send + Sync;

/// Opaque unregistration handle returned by [`ListenerRegistry::on`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    event: String,
    id: u64,
}

impl Subscription {
    /// The event this subscription is attached to.
    pub fn event(&self) -> &str {
        &self.event
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

struct Entry {
    id: u64,
    handler: Arc<EventHandler>,
}

/// Mapping from event name to ordered callbacks.
///
/// The same callback may be registered twice for one event; both entries are
/// kept and both deliver. Removal is by handle, never by callback identity.
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback for an event.
    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            id,
            handler: Arc::new(handler),
        };

        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(entry);

        Subscription {
            event: event.to_string(),
            id,
        }
    }

    /// Remove exactly the callback behind the handle.
    ///
    /// Removing an unknown or already-removed handle is a no-op. The event
    /// key disappears with its last callback.
    pub fn off(&self, subscription: &Subscription) {
        let mut listeners = self.listeners.lock();
        if let Some(entries) = listeners.get_mut(&subscription.event) {
            entries.retain(|e| e.id != subscription.id);
            if entries.is_empty() {
                listeners.remove(&subscription.event);
            }
        }
    }

    /// Remove all callbacks for an event.
    pub fn off_all(&self, event: &str) {
        self.listeners.lock().remove(event);
    }

    /// Number of callbacks currently registered for an event.
    pub fn count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .get(event)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Look up the handler behind a subscription handle.
    pub(crate) fn handler_for(&self, subscription: &Subscription) -> Option<Arc<EventHandler>> {
        self.listeners
            .lock()
            .get(subscription.event())
            .and_then(|entries| {
                entries
                    .iter()
                    .find(|e| e.id == subscription.id())
                    .map(|e| Arc::clone(&e.handler))
            })
    }

    /// Bind every non-reserved registration onto a live transport.
    ///
    /// Called by the manager after each successful (re)connection. Within an
    /// event, callbacks are bound in registration order.
    pub fn attach_all<F>(&self, mut bind: F)
    where
        F: FnMut(&str, u64, &Arc<EventHandler>),
    {
        let listeners = self.listeners.lock();
        for (event, entries) in listeners.iter() {
            if RESERVED_EVENTS.contains(&event.as_str()) {
                continue;
            }
            for entry in entries {
                bind(event, entry.id, &entry.handler);
            }
        }
    }

    /// Deliver an event to every registered callback.
    ///
    /// The callback set is snapshotted before delivery, so callbacks may
    /// register or unregister reentrantly. Returns the number of callbacks
    /// invoked.
    pub fn dispatch(&self, event: &str, args: &[Value]) -> usize {
        let snapshot: Vec<Arc<EventHandler>> = {
            let listeners = self.listeners.lock();
            match listeners.get(event) {
                Some(entries) => entries.iter().map(|e| Arc::clone(&e.handler)).collect(),
                None => return 0,
            }
        };

        for handler in &snapshot {
            invoke_isolated(event, handler, args);
        }
        snapshot.len()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke one callback, containing any panic it raises.
///
/// A failing callback must not abort delivery to the remaining callbacks for
/// the event.
pub(crate) fn invoke_isolated(event: &str, handler: &Arc<EventHandler>, args: &[Value]) {
    if catch_unwind(AssertUnwindSafe(|| handler(args))).is_err() {
        warn!(event, "event callback panicked");
    }
}
