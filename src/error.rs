//! Error types for the event channel

use std::time::Duration;

use thiserror::Error;

/// Errors produced while establishing or running the channel.
///
/// These never cross the listener boundary as panics; the manager recovers
/// locally and surfaces failures through lifecycle events and boolean
/// results.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No credential was available at connect time.
    #[error("authentication token unavailable")]
    AuthMissing,

    /// The handshake did not complete within the configured window.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The server rejected the handshake.
    #[error("handshake rejected: {0}")]
    Handshake(String),

    /// The transport failed during or after the handshake.
    #[error("transport error: {0}")]
    Transport(String),

    /// The retry budget was consumed without a successful connection.
    #[error("retry budget exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// The attempt was cancelled by `disconnect()` or superseded by a newer
    /// connection cycle.
    #[error("connection attempt superseded")]
    Superseded,
}
