use crate::engine::memory::MemoryEngine;
use crate::engine::StorageEngine;
use crate::pubsub::{LocalRelay, MessageRelay};
use std::sync::Arc;

/// Configuration of a [`Backboard`](crate::Backboard) connection manager.
///
/// Holds the storage engine databases are opened on, the relay carrying
/// pub/sub messages and the connection options. Cloning is cheap; clones
/// share the engine and the relay.
#[derive(Clone)]
pub struct BackboardConfig {
    engine: Arc<dyn StorageEngine>,
    relay: Arc<dyn MessageRelay>,
    close_on_version_change: bool,
}

impl Default for BackboardConfig {
    fn default() -> Self {
        BackboardConfig {
            engine: Arc::new(MemoryEngine::default()),
            relay: Arc::new(LocalRelay::new()),
            close_on_version_change: false,
        }
    }
}

impl BackboardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(&self) -> Arc<dyn StorageEngine> {
        self.engine.clone()
    }

    pub fn relay(&self) -> Arc<dyn MessageRelay> {
        self.relay.clone()
    }

    /// Whether opened databases close themselves when another connection
    /// requests a version change.
    pub fn close_on_version_change(&self) -> bool {
        self.close_on_version_change
    }

    pub(crate) fn set_engine(&mut self, engine: Arc<dyn StorageEngine>) {
        self.engine = engine;
    }

    pub(crate) fn set_relay(&mut self, relay: Arc<dyn MessageRelay>) {
        self.relay = relay;
    }

    pub(crate) fn set_close_on_version_change(&mut self, close: bool) {
        self.close_on_version_change = close;
    }
}
