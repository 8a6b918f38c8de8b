//! Wire protocol for the event channel
//!
//! All frames are JSON text messages. The first client frame on a fresh
//! socket is the handshake; everything after it is an event frame. The
//! server acknowledges the handshake with `welcome` before any events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Handshake sent as the first frame on a new connection.
///
/// Serializes to exactly `{"auth":{"token":<credential>}}`.
#[derive(Debug, Clone, Serialize)]
pub struct Handshake {
    pub auth: HandshakeAuth,
}

/// Credential carrier inside the handshake.
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeAuth {
    pub token: String,
}

impl Handshake {
    /// Build a handshake around a credential.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            auth: HandshakeAuth {
                token: token.into(),
            },
        }
    }

    /// Serializes the handshake to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// An application event, in either direction.
///
/// Argument order is preserved as sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl EventFrame {
    /// Build an event frame.
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }

    /// Serializes the frame to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake acknowledgment; the session is authenticated.
    Welcome,

    /// An application event.
    Event {
        event: String,
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Server-reported error.
    Error { message: String },
}

impl ServerFrame {
    /// Deserializes a frame from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
