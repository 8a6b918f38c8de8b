//! Scoped consumer handle
//!
//! Lets application code observe connectivity and talk to the channel
//! without managing the manager's lifecycle. Activation registers the
//! lifecycle mirrors; dropping the facade releases them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use super::manager::ChannelManager;
use crate::registry::{lifecycle, Subscription};

/// Consumer-facing view of the channel.
///
/// Mirrors the `connect`/`disconnect` lifecycle into a local flag and passes
/// everything else through to the [`ChannelManager`]. Holds no protocol
/// state of its own.
pub struct ChannelFacade {
    manager: ChannelManager,
    connected: Arc<AtomicBool>,
    lifecycle_subs: Vec<Subscription>,
}

impl ChannelFacade {
    /// Activate a facade over a manager handle.
    pub fn new(manager: ChannelManager) -> Self {
        let connected = Arc::new(AtomicBool::new(manager.is_connected()));

        let on_connect = {
            let connected = Arc::clone(&connected);
            manager.on(lifecycle::CONNECT, move |_| {
                connected.store(true, Ordering::SeqCst);
            })
        };
        let on_disconnect = {
            let connected = Arc::clone(&connected);
            manager.on(lifecycle::DISCONNECT, move |_| {
                connected.store(false, Ordering::SeqCst);
            })
        };

        Self {
            manager,
            connected,
            lifecycle_subs: vec![on_connect, on_disconnect],
        }
    }

    /// Whether the channel was connected at the last lifecycle transition.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// See [`ChannelManager::connect`].
    pub async fn connect(&self) -> bool {
        self.manager.connect().await
    }

    /// See [`ChannelManager::disconnect`].
    pub fn disconnect(&self) {
        self.manager.disconnect()
    }

    /// See [`ChannelManager::on`].
    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.manager.on(event, handler)
    }

    /// See [`ChannelManager::off`].
    pub fn off(&self, subscription: &Subscription) {
        self.manager.off(subscription)
    }

    /// See [`ChannelManager::off_all`].
    pub fn off_all(&self, event: &str) {
        self.manager.off_all(event)
    }

    /// See [`ChannelManager::emit`].
    pub fn emit(&self, event: &str, args: Vec<Value>) -> bool {
        self.manager.emit(event, args)
    }

    /// The underlying manager handle.
    pub fn manager(&self) -> &ChannelManager {
        &self.manager
    }
}

impl Drop for ChannelFacade {
    fn drop(&mut self) {
        for subscription in &self.lifecycle_subs {
            self.manager.off(subscription);
        }
    }
}
