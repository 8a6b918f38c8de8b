//! Connection manager
//!
//! Owns the transport handle and drives the connection state machine:
//! credential fetch, handshake under a timeout, lifecycle event delivery,
//! and exponential-backoff reconnection that preserves subscriptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::state::{ConnectionState, DisconnectCause, CLIENT_DISCONNECT_REASON};
use crate::auth::TokenStore;
use crate::backoff::Backoff;
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::protocol::{EventFrame, Handshake};
use crate::registry::{
    self, lifecycle, EventHandler, ListenerRegistry, Subscription, RESERVED_EVENTS,
};
use crate::transport::{Connector, Transport, TransportEvent, WsConnector};

/// Per-connection bindings from event name to the callbacks receiving it.
///
/// Rebuilt from the registry on every successful (re)connection, so
/// subscriptions survive transport churn.
type Bindings = Arc<Mutex<HashMap<String, Vec<(u64, Arc<EventHandler>)>>>>;

/// Live transport link while connected.
struct LiveLink {
    outbound: tokio::sync::mpsc::UnboundedSender<EventFrame>,
    bindings: Bindings,
    reader: JoinHandle<()>,
}

struct Inner {
    config: ChannelConfig,
    tokens: Arc<dyn TokenStore>,
    connector: Arc<dyn Connector>,
    registry: ListenerRegistry,
    state: Mutex<ConnectionState>,
    backoff: Mutex<Backoff>,
    /// Single pending-timer slot: the reconnect driver's handle.
    retry_task: Mutex<Option<JoinHandle<()>>>,
    live: Mutex<Option<LiveLink>>,
    /// Bumped by `disconnect()`; in-flight cycles from older generations
    /// become no-ops when they resolve.
    generation: AtomicU64,
}

// Lock order is state before live; never take them the other way around.

/// Resilient event-channel client.
///
/// One explicitly constructed instance per application session; clones are
/// cheap handles onto the same channel. `disconnect()` is the teardown: it
/// cancels pending timers, closes the transport, and detaches from transport
/// callbacks, after which the instance can be reconnected or dropped.
#[derive(Clone)]
pub struct ChannelManager {
    inner: Arc<Inner>,
}

impl ChannelManager {
    /// Create a manager using the WebSocket transport.
    pub fn new(config: ChannelConfig, tokens: Arc<dyn TokenStore>) -> Self {
        Self::with_connector(config, tokens, Arc::new(WsConnector))
    }

    /// Create a manager with a custom transport connector.
    pub fn with_connector(
        config: ChannelConfig,
        tokens: Arc<dyn TokenStore>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let backoff = Backoff::new(config.retry.policy());
        Self {
            inner: Arc::new(Inner {
                config,
                tokens,
                connector,
                registry: ListenerRegistry::new(),
                state: Mutex::new(ConnectionState::Disconnected),
                backoff: Mutex::new(backoff),
                retry_task: Mutex::new(None),
                live: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Current state of the connection.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Whether the transport is open and authenticated.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Establish the connection.
    ///
    /// Idempotent: returns `true` immediately when already connected and
    /// `false` when a handshake or retry cycle is already in flight. A fresh
    /// call re-reads the credential and starts a new retry budget. Failures
    /// are also surfaced through the `connect_error` lifecycle event.
    pub async fn connect(&self) -> bool {
        let generation = {
            let mut state = self.inner.state.lock();
            match *state {
                ConnectionState::Connected => return true,
                ConnectionState::Connecting | ConnectionState::Reconnecting => return false,
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    *state = ConnectionState::Connecting;
                }
            }
            // Snapshot inside the critical section: any later disconnect()
            // bumps past this and cancels the cycle.
            self.inner.generation.load(Ordering::SeqCst)
        };

        // Explicit connect starts over: fresh budget, no stale driver handle.
        self.inner.backoff.lock().reset();
        self.inner.retry_task.lock().take();
        match Arc::clone(&self.inner).attempt(generation).await {
            Ok(()) => true,
            Err(ChannelError::Superseded) => false,
            Err(ChannelError::AuthMissing) => {
                self.inner.abandon_unauthenticated(generation);
                false
            }
            Err(err) => {
                warn!(error = %err, "connection attempt failed");
                self.inner
                    .registry
                    .dispatch(lifecycle::CONNECT_ERROR, &[Value::String(err.to_string())]);
                Arc::clone(&self.inner).schedule_retry(generation);
                false
            }
        }
    }

    /// Tear the connection down.
    ///
    /// Safe from any state, idempotent, and never schedules a retry: pending
    /// timers are cancelled and an in-flight handshake resolving later has no
    /// effect on state.
    pub fn disconnect(&self) {
        // Invalidate in-flight cycles before touching anything else.
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(task) = self.inner.retry_task.lock().take() {
            task.abort();
        }

        let was_connected = {
            let mut state = self.inner.state.lock();
            let was = state.is_connected();
            *state = ConnectionState::Disconnected;
            was
        };

        if let Some(link) = self.inner.live.lock().take() {
            link.reader.abort();
            // Dropping the outbound half closes the socket.
        }

        if was_connected {
            info!("channel disconnected");
            self.inner.registry.dispatch(
                lifecycle::DISCONNECT,
                &[Value::String(CLIENT_DISCONNECT_REASON.to_string())],
            );
        }
    }

    /// Register a callback for an event.
    ///
    /// Non-reserved registrations made while connected start receiving
    /// immediately; all registrations persist across reconnects.
    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let subscription = self.inner.registry.on(event, handler);

        if !RESERVED_EVENTS.contains(&event) {
            if let Some(handler) = self.inner.registry.handler_for(&subscription) {
                if let Some(link) = self.inner.live.lock().as_ref() {
                    link.bindings
                        .lock()
                        .entry(event.to_string())
                        .or_default()
                        .push((subscription.id(), handler));
                }
            }
        }

        subscription
    }

    /// Remove exactly the callback behind the handle. Unknown handles are a
    /// no-op.
    pub fn off(&self, subscription: &Subscription) {
        self.inner.registry.off(subscription);

        if let Some(link) = self.inner.live.lock().as_ref() {
            let mut bindings = link.bindings.lock();
            if let Some(entries) = bindings.get_mut(subscription.event()) {
                entries.retain(|(id, _)| *id != subscription.id());
                if entries.is_empty() {
                    bindings.remove(subscription.event());
                }
            }
        }
    }

    /// Remove all callbacks for an event.
    pub fn off_all(&self, event: &str) {
        self.inner.registry.off_all(event);

        if let Some(link) = self.inner.live.lock().as_ref() {
            link.bindings.lock().remove(event);
        }
    }

    /// Number of callbacks currently registered for an event.
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.registry.count(event)
    }

    /// Send an event to the server.
    ///
    /// Returns `false` without queueing when not connected, and kicks off a
    /// best-effort `connect()` in the background.
    pub fn emit(&self, event: &str, args: Vec<Value>) -> bool {
        let sent = if self.is_connected() {
            match self.inner.live.lock().as_ref() {
                Some(link) => link.outbound.send(EventFrame::new(event, args)).is_ok(),
                None => false,
            }
        } else {
            false
        };

        if !sent {
            warn!(event, "emit while disconnected, message dropped");
            let manager = self.clone();
            tokio::spawn(async move {
                manager.connect().await;
            });
        }
        sent
    }
}

impl Inner {
    fn stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    /// One connection cycle: credential fetch, handshake under the timeout,
    /// link installation. The credential is re-read on every call so a
    /// rotation between attempts is honored.
    async fn attempt(self: Arc<Self>, generation: u64) -> Result<(), ChannelError> {
        let token = self.tokens.get(&self.config.auth.token_key).await;
        if self.stale(generation) {
            return Err(ChannelError::Superseded);
        }
        let token = token.ok_or(ChannelError::AuthMissing)?;

        let url = self.config.server.socket_url();
        let handshake = Handshake::new(token);
        debug!(%url, "opening transport");

        let window = self.config.server.connect_timeout();
        let transport = match timeout(window, self.connector.connect(&url, &handshake)).await {
            Err(_) => return Err(ChannelError::HandshakeTimeout(window)),
            Ok(Err(err)) => return Err(err),
            Ok(Ok(transport)) => transport,
        };
        if self.stale(generation) {
            return Err(ChannelError::Superseded);
        }

        self.install(transport, generation)
    }

    /// Install a freshly authenticated transport and transition to
    /// `Connected`.
    fn install(self: &Arc<Self>, transport: Transport, generation: u64) -> Result<(), ChannelError> {
        let (outbound, events) = transport.split();

        // Replay every persistent registration onto the new link.
        let bindings: Bindings = Arc::new(Mutex::new(HashMap::new()));
        {
            let mut map = bindings.lock();
            self.registry.attach_all(|event, id, handler| {
                map.entry(event.to_string())
                    .or_default()
                    .push((id, Arc::clone(handler)));
            });
        }

        {
            let mut state = self.state.lock();
            if self.stale(generation) {
                return Err(ChannelError::Superseded);
            }
            *state = ConnectionState::Connected;

            let reader = tokio::spawn(read_loop(
                Arc::clone(self),
                events,
                Arc::clone(&bindings),
                generation,
            ));
            *self.live.lock() = Some(LiveLink {
                outbound,
                bindings,
                reader,
            });
        }

        self.backoff.lock().reset();
        info!("channel connected");
        self.registry.dispatch(lifecycle::CONNECT, &[]);
        Ok(())
    }

    /// Credential absent: fail the attempt with no retry and revert to
    /// `Disconnected`.
    fn abandon_unauthenticated(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if self.stale(generation) {
                return;
            }
            *state = ConnectionState::Disconnected;
        }
        warn!("credential unavailable, connection attempt abandoned");
        self.registry.dispatch(
            lifecycle::CONNECT_ERROR,
            &[Value::String(ChannelError::AuthMissing.to_string())],
        );
    }

    /// Start the reconnect driver for this generation.
    fn schedule_retry(self: Arc<Self>, generation: u64) {
        if self.stale(generation) {
            return;
        }
        let task = tokio::spawn(reconnect_loop(Arc::clone(&self), generation));
        *self.retry_task.lock() = Some(task);
    }

    /// Handle a transport drop that was not initiated by `disconnect()`.
    fn on_transport_closed(self: &Arc<Self>, generation: u64, reason: String) {
        let cause = DisconnectCause::classify(&reason);
        {
            let mut state = self.state.lock();
            if self.stale(generation) || !state.is_connected() {
                return;
            }
            *state = if cause.should_retry() {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Disconnected
            };
        }
        self.live.lock().take();

        info!(reason = %cause.reason(), "transport dropped");
        self.registry.dispatch(
            lifecycle::DISCONNECT,
            &[Value::String(cause.reason().to_string())],
        );

        if cause.should_retry() {
            Arc::clone(self).schedule_retry(generation);
        }
    }
}

/// Drive retries after a failed attempt or an unintended drop.
///
/// Exactly one driver runs at a time; its handle fills the manager's single
/// pending-timer slot and `disconnect()` aborts it. Each cycle re-reads the
/// credential through the normal attempt path.
async fn reconnect_loop(inner: Arc<Inner>, generation: u64) {
    loop {
        let delay = inner.backoff.lock().next_delay();
        let Some(delay) = delay else {
            let attempts = inner.backoff.lock().attempt();
            {
                let mut state = inner.state.lock();
                if inner.stale(generation) {
                    break;
                }
                *state = ConnectionState::Failed;
            }
            warn!(attempts, "retry budget exhausted, giving up");
            inner.registry.dispatch(
                lifecycle::ERROR,
                &[Value::String(
                    ChannelError::RetryExhausted { attempts }.to_string(),
                )],
            );
            break;
        };

        {
            let mut state = inner.state.lock();
            if inner.stale(generation) {
                break;
            }
            *state = ConnectionState::Reconnecting;
        }
        debug!(
            delay_ms = delay.as_millis() as u64,
            attempt = inner.backoff.lock().attempt(),
            "reconnect scheduled"
        );
        tokio::time::sleep(delay).await;
        if inner.stale(generation) {
            break;
        }

        {
            let mut state = inner.state.lock();
            if inner.stale(generation) {
                break;
            }
            *state = ConnectionState::Connecting;
        }

        match Arc::clone(&inner).attempt(generation).await {
            Ok(()) => break,
            Err(ChannelError::Superseded) => break,
            Err(ChannelError::AuthMissing) => {
                inner.abandon_unauthenticated(generation);
                break;
            }
            Err(err) => {
                warn!(error = %err, "reconnect attempt failed");
                inner
                    .registry
                    .dispatch(lifecycle::CONNECT_ERROR, &[Value::String(err.to_string())]);
            }
        }
    }
    // The finished handle stays in the slot; aborting it later is a no-op
    // and the next cycle replaces it.
}

/// Pump transport events into listener callbacks until the link drops.
async fn read_loop(
    inner: Arc<Inner>,
    mut events: UnboundedReceiver<TransportEvent>,
    bindings: Bindings,
    generation: u64,
) {
    let reason = loop {
        match events.recv().await {
            Some(TransportEvent::Frame(frame)) => {
                if RESERVED_EVENTS.contains(&frame.event.as_str()) {
                    warn!(event = %frame.event, "server frame uses a reserved event name, dropping");
                    continue;
                }
                // Snapshot so callbacks may subscribe/unsubscribe reentrantly.
                let snapshot: Vec<Arc<EventHandler>> = {
                    let map = bindings.lock();
                    map.get(&frame.event)
                        .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
                        .unwrap_or_default()
                };
                if snapshot.is_empty() {
                    debug!(event = %frame.event, "no listeners for event");
                    continue;
                }
                for handler in &snapshot {
                    registry::invoke_isolated(&frame.event, handler, &frame.args);
                }
            }
            Some(TransportEvent::Closed { reason }) => break reason,
            None => break "transport task ended".to_string(),
        }
    };

    if inner.stale(generation) {
        return;
    }
    inner.on_transport_closed(generation, reason);
}
