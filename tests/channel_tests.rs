//! Channel lifecycle integration tests
//!
//! Drives the public API against a scripted in-memory connector. Timers run
//! on tokio's paused clock, so backoff delays are virtual.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use eventline::auth::StaticTokenStore;
use eventline::channel::{ChannelFacade, ChannelManager, ConnectionState};
use eventline::config::ChannelConfig;
use eventline::error::ChannelError;
use eventline::protocol::{EventFrame, Handshake};
use eventline::registry::lifecycle;
use eventline::transport::{Connector, Transport, TransportEvent};

/// One scripted connection outcome. The script is consumed front to back;
/// an empty script accepts.
enum Outcome {
    Accept,
    Refuse,
    Hang,
}

/// Server side of an accepted in-memory transport.
struct ServerEnd {
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    outbound_rx: Option<mpsc::UnboundedReceiver<EventFrame>>,
}

struct ScriptedConnector {
    outcomes: Mutex<VecDeque<Outcome>>,
    attempts: AtomicUsize,
    tokens_seen: Mutex<Vec<String>>,
    servers: Mutex<Vec<ServerEnd>>,
}

impl ScriptedConnector {
    fn new(script: Vec<Outcome>) -> Self {
        Self {
            outcomes: Mutex::new(script.into()),
            attempts: AtomicUsize::new(0),
            tokens_seen: Mutex::new(Vec::new()),
            servers: Mutex::new(Vec::new()),
        }
    }

    fn push_outcome(&self, outcome: Outcome) {
        self.outcomes.lock().push_back(outcome);
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().clone()
    }

    /// Push a server-sent event down connection `index`.
    fn send_event(&self, index: usize, event: &str, args: Vec<Value>) {
        let servers = self.servers.lock();
        let _ = servers[index]
            .events_tx
            .send(TransportEvent::Frame(EventFrame::new(event, args)));
    }

    /// Close connection `index` from the server side.
    fn drop_connection(&self, index: usize, reason: &str) {
        let servers = self.servers.lock();
        let _ = servers[index].events_tx.send(TransportEvent::Closed {
            reason: reason.to_string(),
        });
    }

    /// Take the receiver for frames the client sent on connection `index`.
    fn take_outbound(&self, index: usize) -> mpsc::UnboundedReceiver<EventFrame> {
        self.servers.lock()[index].outbound_rx.take().unwrap()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _url: &str, handshake: &Handshake) -> Result<Transport, ChannelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen.lock().push(handshake.auth.token.clone());

        let outcome = self.outcomes.lock().pop_front().unwrap_or(Outcome::Accept);
        match outcome {
            Outcome::Refuse => Err(ChannelError::Transport("connection refused".to_string())),
            Outcome::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Outcome::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                self.servers.lock().push(ServerEnd {
                    events_tx,
                    outbound_rx: Some(outbound_rx),
                });
                Ok(Transport::new(outbound_tx, events_rx))
            }
        }
    }
}

fn setup(script: Vec<Outcome>) -> (ChannelManager, Arc<ScriptedConnector>, Arc<StaticTokenStore>) {
    let connector = Arc::new(ScriptedConnector::new(script));
    let tokens = Arc::new(StaticTokenStore::with_token("token-1"));
    let manager = ChannelManager::with_connector(
        ChannelConfig::for_url("https://fleet.example.com/api/v1"),
        tokens.clone(),
        connector.clone(),
    );
    (manager, connector, tokens)
}

/// Poll until the condition holds, letting the paused clock advance.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn recorder() -> (
    Arc<Mutex<Vec<Vec<Value>>>>,
    impl Fn(&[Value]) + Send + Sync + 'static,
) {
    let seen: Arc<Mutex<Vec<Vec<Value>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |args: &[Value]| sink.lock().push(args.to_vec()))
}

#[tokio::test(start_paused = true)]
async fn test_connect_success_delivers_lifecycle() {
    let (manager, connector, _tokens) = setup(vec![]);
    let (connects, on_connect) = recorder();
    manager.on(lifecycle::CONNECT, on_connect);

    assert!(manager.connect().await);
    assert!(manager.is_connected());
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(connector.attempts(), 1);
    assert_eq!(connector.tokens_seen(), vec!["token-1".to_string()]);
    assert_eq!(connects.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_idempotent_while_connected() {
    let (manager, connector, _tokens) = setup(vec![]);

    assert!(manager.connect().await);
    assert!(manager.connect().await);
    assert!(manager.connect().await);

    // No second handshake for the repeated calls.
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_without_credential_schedules_nothing() {
    let (manager, connector, tokens) = setup(vec![]);
    tokens.clear();

    let (errors, on_error) = recorder();
    manager.on(lifecycle::CONNECT_ERROR, on_error);

    assert!(!manager.connect().await);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(connector.attempts(), 0);
    assert_eq!(errors.lock().len(), 1);

    // No retry ever fires.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 0);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_listener_replay_after_unexpected_drop() {
    let (manager, connector, _tokens) = setup(vec![]);

    let (telemetry, on_telemetry) = recorder();
    manager.on("telemetry", on_telemetry);
    let (disconnects, on_disconnect) = recorder();
    manager.on(lifecycle::DISCONNECT, on_disconnect);

    assert!(manager.connect().await);
    connector.send_event(0, "telemetry", vec![json!(1)]);
    wait_until(|| telemetry.lock().len() == 1).await;

    // Server-side drop: Connected -> Reconnecting -> Connected.
    connector.drop_connection(0, "transport close");
    wait_until(|| manager.state() == ConnectionState::Reconnecting).await;
    wait_until(|| manager.is_connected()).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(
        disconnects.lock().as_slice(),
        &[vec![json!("transport close")]]
    );

    // The registration delivers on the new transport without re-subscribing.
    connector.send_event(1, "telemetry", vec![json!(2)]);
    wait_until(|| telemetry.lock().len() == 2).await;
    assert_eq!(telemetry.lock()[1], vec![json!(2)]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_rereads_rotated_credential() {
    let (manager, connector, tokens) = setup(vec![]);

    assert!(manager.connect().await);
    tokens.set("token-2");

    connector.drop_connection(0, "transport close");
    wait_until(|| connector.attempts() == 2).await;
    wait_until(|| manager.is_connected()).await;

    assert_eq!(
        connector.tokens_seen(),
        vec!["token-1".to_string(), "token-2".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhaustion_fires_error_once() {
    let (manager, connector, _tokens) = setup(vec![
        Outcome::Refuse,
        Outcome::Refuse,
        Outcome::Refuse,
        Outcome::Refuse,
        Outcome::Refuse,
        Outcome::Refuse,
    ]);
    let (errors, on_error) = recorder();
    manager.on(lifecycle::ERROR, on_error);
    let (connect_errors, on_connect_error) = recorder();
    manager.on(lifecycle::CONNECT_ERROR, on_connect_error);

    assert!(!manager.connect().await);
    wait_until(|| manager.state() == ConnectionState::Failed).await;

    // Initial attempt plus five retries; the sixth retry is skipped.
    assert_eq!(connector.attempts(), 6);
    assert_eq!(errors.lock().len(), 1);
    assert_eq!(connect_errors.lock().len(), 6);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 6);
    assert_eq!(errors.lock().len(), 1);

    // An explicit connect() retries with a fresh budget.
    connector.push_outcome(Outcome::Accept);
    assert!(manager.connect().await);
    assert_eq!(connector.attempts(), 7);
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_routes_to_retry() {
    let (manager, connector, _tokens) = setup(vec![Outcome::Hang]);

    assert!(!manager.connect().await);
    wait_until(|| manager.is_connected()).await;
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_retry() {
    let (manager, connector, _tokens) = setup(vec![Outcome::Refuse]);

    assert!(!manager.connect().await);
    wait_until(|| manager.state() == ConnectionState::Reconnecting).await;

    manager.disconnect();
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_stale_transport_cannot_resurrect_after_disconnect() {
    let (manager, connector, _tokens) = setup(vec![]);

    assert!(manager.connect().await);
    manager.disconnect();
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // A close event from the torn-down transport must not drive a reconnect.
    connector.drop_connection(0, "transport close");
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_emit_round_trip_and_disconnected_failure() {
    let (manager, connector, _tokens) = setup(vec![]);

    // Not connected: the message is dropped and a reconnect is kicked off.
    assert!(!manager.emit("position", vec![json!(1)]));
    wait_until(|| manager.is_connected()).await;
    assert_eq!(connector.attempts(), 1);

    let mut outbound = connector.take_outbound(0);
    assert!(manager.emit("position", vec![json!(2), json!("n")]));
    let frame = outbound.recv().await.unwrap();
    assert_eq!(frame, EventFrame::new("position", vec![json!(2), json!("n")]));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_registration_delivers_twice() {
    let (manager, connector, _tokens) = setup(vec![]);

    let hits = Arc::new(AtomicUsize::new(0));
    let handler = {
        let hits = Arc::clone(&hits);
        Arc::new(move |_args: &[Value]| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    };
    let first = {
        let handler = Arc::clone(&handler);
        manager.on("telemetry", move |args| handler(args))
    };
    {
        let handler = Arc::clone(&handler);
        manager.on("telemetry", move |args| handler(args));
    }

    assert!(manager.connect().await);
    connector.send_event(0, "telemetry", vec![]);
    wait_until(|| hits.load(Ordering::SeqCst) == 2).await;

    // Each duplicate is individually removable by its handle.
    manager.off(&first);
    connector.send_event(0, "telemetry", vec![]);
    wait_until(|| hits.load(Ordering::SeqCst) == 3).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_off_all_stops_live_delivery() {
    let (manager, connector, _tokens) = setup(vec![]);

    let (seen, on_telemetry) = recorder();
    manager.on("telemetry", on_telemetry);

    assert!(manager.connect().await);
    connector.send_event(0, "telemetry", vec![json!(1)]);
    wait_until(|| seen.lock().len() == 1).await;

    manager.off_all("telemetry");
    connector.send_event(0, "telemetry", vec![json!(2)]);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_subscription_made_while_connected_is_live() {
    let (manager, connector, _tokens) = setup(vec![]);

    assert!(manager.connect().await);

    let (seen, on_telemetry) = recorder();
    manager.on("telemetry", on_telemetry);

    connector.send_event(0, "telemetry", vec![json!("now")]);
    wait_until(|| seen.lock().len() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_reserved_event_names_cannot_be_shadowed() {
    let (manager, connector, _tokens) = setup(vec![]);

    let (connects, on_connect) = recorder();
    manager.on(lifecycle::CONNECT, on_connect);

    assert!(manager.connect().await);
    assert_eq!(connects.lock().len(), 1);

    // A server frame reusing a lifecycle name is dropped, not dispatched.
    connector.send_event(0, lifecycle::CONNECT, vec![json!("spoof")]);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(connects.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_facade_mirrors_connectivity() {
    let (manager, connector, _tokens) = setup(vec![]);
    let facade = ChannelFacade::new(manager.clone());

    assert!(!facade.is_connected());
    assert!(facade.connect().await);
    assert!(facade.is_connected());

    connector.drop_connection(0, "transport close");
    wait_until(|| !facade.is_connected()).await;
    wait_until(|| facade.is_connected()).await;

    facade.disconnect();
    assert!(!facade.is_connected());

    // A facade built over a connected manager starts in sync.
    assert!(manager.connect().await);
    let late = ChannelFacade::new(manager.clone());
    assert!(late.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_facade_releases_lifecycle_handlers() {
    let (manager, _connector, _tokens) = setup(vec![]);

    {
        let _facade = ChannelFacade::new(manager.clone());
        assert_eq!(manager.listener_count(lifecycle::CONNECT), 1);
        assert_eq!(manager.listener_count(lifecycle::DISCONNECT), 1);
    }

    assert_eq!(manager.listener_count(lifecycle::CONNECT), 0);
    assert_eq!(manager.listener_count(lifecycle::DISCONNECT), 0);
}
