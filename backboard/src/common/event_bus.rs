use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use uuid::Uuid;

/// An event that can be dispatched through an [`EventBus`].
///
/// Every event reports its kind; observers register for one kind and only see
/// events of that kind.
pub trait Event: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// A trait for closures that handle events of type `E`.
///
/// Automatically implemented for any `Send + Sync` closure taking the event and
/// returning `BackboardResult<()>`.
pub trait EventCallback<E>: Send + Sync + Fn(E) -> BackboardResult<()> {}

impl<E, F> EventCallback<E> for F where F: Send + Sync + Fn(E) -> BackboardResult<()> {}

/// A listener wrapping an event callback. Cloning is cheap.
pub struct EventListener<E> {
    on_event: Arc<dyn EventCallback<E>>,
}

impl<E> Clone for EventListener<E> {
    fn clone(&self) -> Self {
        EventListener {
            on_event: self.on_event.clone(),
        }
    }
}

impl<E> EventListener<E> {
    pub fn new(on_event: impl EventCallback<E> + 'static) -> Self {
        EventListener {
            on_event: Arc::new(on_event),
        }
    }

    fn handle(&self, event: E) -> BackboardResult<()> {
        (self.on_event)(event)
    }
}

/// Handle returned on registration, used to deregister the listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberRef {
    id: Uuid,
}

impl SubscriberRef {
    fn new() -> Self {
        SubscriberRef { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Typed observer registry, one listener list per event kind.
///
/// Dispatch takes a snapshot of the listeners registered for the event's kind and
/// invokes them in registration order without holding any lock, so listeners are
/// free to register, deregister or publish further events from inside a callback.
///
/// # Example
///
/// ```ignore
/// let bus: EventBus<DatabaseEvent> = EventBus::new();
/// let subscriber = bus.register(DatabaseEventKind::Closed, EventListener::new(|_| Ok(())));
/// bus.publish(DatabaseEvent::Closed)?;
/// bus.deregister(&subscriber);
/// ```
pub struct EventBus<E: Event> {
    inner: Arc<EventBusInner<E>>,
}

impl<E: Event> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        EventBus {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventBus<E> {
    pub fn new() -> Self {
        EventBus {
            inner: Arc::new(EventBusInner {
                observers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registers `listener` for events of `kind`.
    pub fn register(&self, kind: E::Kind, listener: EventListener<E>) -> SubscriberRef {
        let subscriber = SubscriberRef::new();
        self.inner
            .observers
            .write()
            .entry(kind)
            .or_default()
            .push((subscriber.clone(), listener));
        subscriber
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn deregister(&self, subscriber: &SubscriberRef) -> bool {
        let mut observers = self.inner.observers.write();
        for listeners in observers.values_mut() {
            if let Some(position) = listeners.iter().position(|(id, _)| id == subscriber) {
                listeners.remove(position);
                return true;
            }
        }
        false
    }

    /// Removes every listener registered for `kind`, returning how many were removed.
    pub fn deregister_kind(&self, kind: E::Kind) -> usize {
        self.inner
            .observers
            .write()
            .remove(&kind)
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// Publishes an event to every listener of its kind.
    ///
    /// All listeners run even if one fails; the first failure is returned as an
    /// `EventError` carrying the listener's error as cause.
    pub fn publish(&self, event: E) -> BackboardResult<()> {
        let kind = event.kind();
        let listeners: Vec<EventListener<E>> = {
            let observers = self.inner.observers.read();
            match observers.get(&kind) {
                Some(listeners) if !listeners.is_empty() => {
                    listeners.iter().map(|(_, listener)| listener.clone()).collect()
                }
                // Fast path: nobody is listening
                _ => return Ok(()),
            }
        };

        let mut first_error = None;
        for listener in listeners {
            if let Err(e) = listener.handle(event.clone()) {
                log::error!("Listener for {:?} failed: {}", kind, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(cause) => Err(BackboardError::new_with_cause(
                &format!("Event listener for {:?} failed", kind),
                ErrorKind::EventError,
                cause,
            )),
            None => Ok(()),
        }
    }

    pub fn has_listeners(&self, kind: E::Kind) -> bool {
        self.listener_count(kind) > 0
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.inner
            .observers
            .read()
            .get(&kind)
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// Removes every listener of every kind.
    pub fn close(&self) {
        self.inner.observers.write().clear();
    }
}

struct EventBusInner<E: Event> {
    observers: RwLock<HashMap<E::Kind, Vec<(SubscriberRef, EventListener<E>)>>>,
}
