//! Transport layer
//!
//! Seam between the connection manager and the wire. A [`Connector`] opens
//! the socket, sends the handshake, and waits for the server acknowledgment;
//! the manager applies the connect timeout around the whole exchange.

mod ws;

pub use ws::WsConnector;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::protocol::{EventFrame, Handshake};

/// Inbound notifications from a live transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A decoded application event.
    Frame(EventFrame),
    /// The transport is gone; carries the close reason.
    Closed { reason: String },
}

/// Handle to an open, authenticated transport.
///
/// Dropping the outbound half closes the underlying socket.
pub struct Transport {
    outbound: mpsc::UnboundedSender<EventFrame>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Transport {
    /// Assemble a transport from its channel halves.
    pub fn new(
        outbound: mpsc::UnboundedSender<EventFrame>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, events }
    }

    /// Split into the outbound sender and the inbound event stream.
    pub fn split(
        self,
    ) -> (
        mpsc::UnboundedSender<EventFrame>,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        (self.outbound, self.events)
    }
}

/// Opens authenticated transports.
///
/// Implementations complete the full handshake: socket open, credential
/// frame, and server acknowledgment. Swappable for an in-memory double in
/// tests.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `url`, authenticating with `handshake`.
    async fn connect(&self, url: &str, handshake: &Handshake) -> Result<Transport, ChannelError>;
}
