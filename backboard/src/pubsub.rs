use crate::errors::BackboardResult;
use dashmap::DashMap;
use indexmap::IndexMap;
use itertools::Itertools;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// Callback receiving `(channel, message)` for every message on the relay.
pub type RelayListener = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Shared message channel between connection managers.
///
/// A relay carries every published message to every attached listener,
/// regardless of channel; filtering by subscription is up to the listener.
/// `subscribe` and `unsubscribe` only keep the relay informed of which
/// channels are in use.
pub trait MessageRelay: Send + Sync {
    fn publish(&self, channel: &str, message: &str) -> BackboardResult<()>;

    fn subscribe(&self, channel: &str);

    fn unsubscribe(&self, channel: &str);

    /// Attaches a listener, returning its id for [`detach`](MessageRelay::detach).
    fn attach(&self, listener: RelayListener) -> Uuid;

    fn detach(&self, id: &Uuid) -> bool;
}

/// In-process [`MessageRelay`].
///
/// Channel usage is reference counted: a channel stays active while at least
/// one manager is subscribed to it.
#[derive(Clone, Default)]
pub struct LocalRelay {
    inner: Arc<LocalRelayInner>,
}

#[derive(Default)]
struct LocalRelayInner {
    listeners: RwLock<IndexMap<Uuid, RelayListener>>,
    channels: DashMap<String, usize>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels with at least one subscriber, sorted.
    pub fn active_channels(&self) -> Vec<String> {
        self.inner
            .channels
            .iter()
            .map(|entry| entry.key().clone())
            .sorted()
            .collect()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}

impl MessageRelay for LocalRelay {
    fn publish(&self, channel: &str, message: &str) -> BackboardResult<()> {
        let listeners: Vec<RelayListener> = self.inner.listeners.read().values().cloned().collect();
        log::debug!("Relaying message on '{}' to {} listeners", channel, listeners.len());
        for listener in listeners {
            listener(channel, message);
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str) {
        *self.inner.channels.entry(channel.to_string()).or_insert(0) += 1;
    }

    fn unsubscribe(&self, channel: &str) {
        if let Some(mut count) = self.inner.channels.get_mut(channel) {
            *count = count.saturating_sub(1);
        }
        self.inner.channels.remove_if(channel, |_, count| *count == 0);
    }

    fn attach(&self, listener: RelayListener) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.listeners.write().insert(id, listener);
        id
    }

    fn detach(&self, id: &Uuid) -> bool {
        self.inner.listeners.write().shift_remove(id).is_some()
    }
}
