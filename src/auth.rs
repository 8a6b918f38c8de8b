//! Credential lookup
//!
//! The channel authenticates with an opaque token owned by an external
//! store. The token is re-read on every connection attempt, so a rotation
//! between attempts is picked up without restarting the client.

use async_trait::async_trait;
use parking_lot::Mutex;

/// External token store collaborator.
///
/// `None` means "cannot authenticate" — lookup failures are expected to be
/// swallowed into absence by the implementation, not surfaced as transport
/// errors.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Fetch the credential stored under `key`, if any.
    async fn get(&self, key: &str) -> Option<String>;
}

/// In-memory token store for embedding and tests.
#[derive(Default)]
pub struct StaticTokenStore {
    token: Mutex<Option<String>>,
}

impl StaticTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding a token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    /// Install or rotate the token.
    pub fn set(&self, token: impl Into<String>) {
        *self.token.lock() = Some(token.into());
    }

    /// Remove the token.
    pub fn clear(&self) {
        *self.token.lock() = None;
    }
}

#[async_trait]
impl TokenStore for StaticTokenStore {
    async fn get(&self, _key: &str) -> Option<String> {
        self.token.lock().clone()
    }
}
