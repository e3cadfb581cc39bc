use crate::backboard::Backboard;
use crate::backboard_config::BackboardConfig;
use crate::engine::StorageEngine;
use crate::pubsub::MessageRelay;
use std::sync::Arc;

/// Builder for a [`Backboard`] connection manager.
///
/// Defaults to a private [`MemoryEngine`](crate::engine::memory::MemoryEngine)
/// and a private [`LocalRelay`](crate::pubsub::LocalRelay). Share an engine or
/// a relay between managers by passing clones of the same instance.
///
/// # Examples
///
/// ```rust,ignore
/// let engine = MemoryEngine::new(MemoryEngineConfig::new().quota_bytes(1 << 20));
/// let relay = LocalRelay::new();
/// let backboard = Backboard::builder()
///     .engine(engine)
///     .relay(relay)
///     .close_on_version_change(true)
///     .build();
/// ```
#[derive(Default)]
pub struct BackboardBuilder {
    config: BackboardConfig,
}

impl BackboardBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage engine the manager opens databases on.
    pub fn engine<E: StorageEngine + 'static>(mut self, engine: E) -> Self {
        self.config.set_engine(Arc::new(engine));
        self
    }

    /// Relay carrying pub/sub messages between managers.
    pub fn relay<R: MessageRelay + 'static>(mut self, relay: R) -> Self {
        self.config.set_relay(Arc::new(relay));
        self
    }

    /// Makes every opened database close itself on a version change request,
    /// so upgrades from other connections are never blocked by this manager.
    pub fn close_on_version_change(mut self, close: bool) -> Self {
        self.config.set_close_on_version_change(close);
        self
    }

    pub fn build(self) -> Backboard {
        Backboard::new(self.config)
    }
}
