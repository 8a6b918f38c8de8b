//! Eventline - resilient real-time event-channel client
//!
//! Maintains a single authenticated connection to a server endpoint and
//! recovers it automatically: credential fetch at connect time, handshake
//! with timeout, exponential-backoff reconnection, and a subscription
//! registry that survives disconnect/reconnect cycles without re-attaching
//! callbacks.

pub mod auth;
pub mod backoff;
pub mod channel;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod util;

pub use auth::{StaticTokenStore, TokenStore};
pub use channel::{ChannelFacade, ChannelManager, ConnectionState};
pub use config::ChannelConfig;
pub use error::ChannelError;
pub use registry::{lifecycle, Subscription};

/// Client version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
