//! Connection state and drop classification

use std::fmt;

/// Close reason reported when the client tears the connection down itself.
pub const CLIENT_DISCONNECT_REASON: &str = "client disconnect";

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport; nothing pending.
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Transport open and authenticated.
    Connected,
    /// Backoff timer pending or retry handshake in flight after a drop.
    Reconnecting,
    /// Retry budget exhausted; only an explicit `connect()` leaves this.
    Failed,
}

impl ConnectionState {
    /// Whether the transport is open and authenticated.
    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }

    /// Whether a handshake or retry cycle is already in flight.
    pub fn is_attempt_in_flight(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Why the transport went away.
///
/// The retry decision is made here, from the close reason, rather than by
/// string-matching scattered through the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Close requested by this client; never retried.
    Intentional,
    /// Everything else: server-initiated close, transport error, drop.
    Unintentional(String),
}

impl DisconnectCause {
    /// Classify a transport close reason.
    pub fn classify(reason: &str) -> Self {
        if reason == CLIENT_DISCONNECT_REASON {
            DisconnectCause::Intentional
        } else {
            DisconnectCause::Unintentional(reason.to_string())
        }
    }

    /// Whether this drop enters the reconnect path.
    pub fn should_retry(&self) -> bool {
        matches!(self, DisconnectCause::Unintentional(_))
    }

    /// The reason string delivered with the `disconnect` lifecycle event.
    pub fn reason(&self) -> &str {
        match self {
            DisconnectCause::Intentional => CLIENT_DISCONNECT_REASON,
            DisconnectCause::Unintentional(reason) => reason,
        }
    }
}
