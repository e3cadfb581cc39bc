use crate::common::{EventBus, Key, KeyRange, SubscriberRef};
use crate::engine::{ConnectionObserver, EngineConnection, TransactionMode, VersionChangeEvent};
use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use crate::event::{DatabaseEvent, DatabaseEventKind, DatabaseEventListener};
use crate::transaction::{ObjectStore, QuotaRelay, Transaction};
use itertools::Itertools;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// An open connection to one database.
///
/// # Purpose
/// `Database` is what [`Backboard::open`](crate::Backboard::open) returns. It
/// exposes the structure of the database, opens transactions over its stores
/// and relays the notifications the engine sends to the connection.
///
/// # Characteristics
/// - **Cloneable**: clones share one engine connection
/// - **Event Driven**: `VersionChange` when another connection wants to upgrade
///   or delete the database, `Closed` once when the handle closes
/// - **Auto Close**: dropping the last clone closes the connection
///
/// # Usage
/// ```text
/// let db = backboard.open("league", schemas)?;
/// db.on(DatabaseEventKind::VersionChange, DatabaseEventListener::new(|_| Ok(())));
/// let players = db.store("players")?;
/// let pid = players.put(json!({"name": "John", "tid": 1}))?;
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub(crate) fn new(
        connection: Arc<dyn EngineConnection>,
        close_on_version_change: bool,
        quota_relay: Option<QuotaRelay>,
    ) -> Self {
        let inner = Arc::new(DatabaseInner {
            id: Uuid::new_v4(),
            connection,
            events: EventBus::new(),
            closed: AtomicBool::new(false),
            close_on_version_change,
            quota_relay,
        });
        inner.connection.set_observer(Arc::new(DatabaseObserver {
            database: Arc::downgrade(&inner),
        }));
        log::debug!(
            "Database handle {} opened on '{}' at version {}",
            inner.id,
            inner.connection.name(),
            inner.connection.version()
        );
        Database { inner }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> String {
        self.inner.connection.name()
    }

    pub fn version(&self) -> u32 {
        self.inner.connection.version()
    }

    /// Names of the object stores, sorted.
    pub fn object_store_names(&self) -> Vec<String> {
        self.inner.connection.object_store_names().into_iter().sorted().collect()
    }

    pub fn index_names(&self, store: &str) -> BackboardResult<Vec<String>> {
        let schema = self.inner.connection.schema();
        let live = schema.store(store).ok_or_else(|| {
            BackboardError::new(
                &format!("Object store '{}' not found", store),
                ErrorKind::NotFoundError,
            )
        })?;
        Ok(live.index_names())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Closes the connection. `Closed` is emitted on the first call only.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Starts a transaction over `store_names`.
    pub fn tx(&self, store_names: &[&str], mode: TransactionMode) -> BackboardResult<Transaction> {
        let scope: Vec<String> = store_names.iter().map(|name| name.to_string()).collect();
        let engine = self.inner.connection.transaction(&scope, mode)?;
        Ok(Transaction::new(engine, self.inner.quota_relay.clone()))
    }

    /// Convenience accessor running each request in its own transaction.
    pub fn store(&self, name: &str) -> BackboardResult<DatabaseStore> {
        if !self.inner.connection.object_store_names().iter().any(|n| n == name) {
            return Err(BackboardError::new(
                &format!("Object store '{}' not found", name),
                ErrorKind::NotFoundError,
            ));
        }
        Ok(DatabaseStore {
            database: self.clone(),
            name: name.to_string(),
        })
    }

    pub fn on(&self, kind: DatabaseEventKind, listener: DatabaseEventListener) -> SubscriberRef {
        self.inner.events.register(kind, listener)
    }

    pub fn off(&self, subscriber: &SubscriberRef) -> bool {
        self.inner.events.deregister(subscriber)
    }

    /// A handle that does not keep the connection open, for listeners that
    /// need to reach the database they are registered on.
    pub fn downgrade(&self) -> WeakDatabase {
        WeakDatabase {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning reference to a [`Database`], see [`Database::downgrade`].
#[derive(Clone)]
pub struct WeakDatabase {
    inner: Weak<DatabaseInner>,
}

impl WeakDatabase {
    /// The database, unless every [`Database`] clone was dropped.
    pub fn upgrade(&self) -> Option<Database> {
        self.inner.upgrade().map(|inner| Database { inner })
    }
}

struct DatabaseInner {
    id: Uuid,
    connection: Arc<dyn EngineConnection>,
    events: EventBus<DatabaseEvent>,
    closed: AtomicBool,
    close_on_version_change: bool,
    quota_relay: Option<QuotaRelay>,
}

impl DatabaseInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.connection.is_closed()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connection.close();
        log::debug!("Database handle {} closed", self.id);
        self.emit(DatabaseEvent::Closed);
    }

    fn emit(&self, event: DatabaseEvent) {
        if let Err(e) = self.events.publish(event) {
            log::error!("Listener of database handle {} failed: {}", self.id, e);
        }
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.connection.close();
        }
    }
}

/// Relays engine notifications of a connection to its handle.
struct DatabaseObserver {
    database: Weak<DatabaseInner>,
}

impl ConnectionObserver for DatabaseObserver {
    fn on_version_change(&self, event: &VersionChangeEvent) {
        let database = match self.database.upgrade() {
            Some(database) => database,
            None => return,
        };
        log::info!(
            "Version change requested on '{}': {} -> {:?}",
            database.connection.name(),
            event.old_version(),
            event.new_version()
        );
        database.emit(DatabaseEvent::VersionChange(*event));
        if database.close_on_version_change {
            database.close();
        }
    }

    fn on_forced_close(&self) {
        if let Some(database) = self.database.upgrade() {
            database.close();
        }
    }
}

/// Per-store convenience operations. Each call opens a single-store
/// transaction, issues one request and completes it; a failing request aborts
/// its transaction.
#[derive(Clone)]
pub struct DatabaseStore {
    database: Database,
    name: String,
}

impl DatabaseStore {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, query: impl Into<KeyRange>) -> BackboardResult<Option<Value>> {
        let query = query.into();
        self.run(TransactionMode::ReadOnly, |store| store.get(query))
    }

    pub fn get_all(&self, query: Option<KeyRange>, limit: Option<usize>) -> BackboardResult<Vec<Value>> {
        self.run(TransactionMode::ReadOnly, |store| store.get_all(query, limit))
    }

    pub fn count(&self, query: Option<KeyRange>) -> BackboardResult<usize> {
        self.run(TransactionMode::ReadOnly, |store| store.count(query))
    }

    pub fn put(&self, value: Value) -> BackboardResult<Key> {
        self.run(TransactionMode::ReadWrite, |store| store.put(value))
    }

    pub fn put_with_key(&self, value: Value, key: impl Into<Key>) -> BackboardResult<Key> {
        let key = key.into();
        self.run(TransactionMode::ReadWrite, |store| store.put_with_key(value, key))
    }

    pub fn add(&self, value: Value) -> BackboardResult<Key> {
        self.run(TransactionMode::ReadWrite, |store| store.add(value))
    }

    pub fn add_with_key(&self, value: Value, key: impl Into<Key>) -> BackboardResult<Key> {
        let key = key.into();
        self.run(TransactionMode::ReadWrite, |store| store.add_with_key(value, key))
    }

    pub fn delete(&self, query: impl Into<KeyRange>) -> BackboardResult<()> {
        let query = query.into();
        self.run(TransactionMode::ReadWrite, |store| store.delete(query))
    }

    pub fn clear(&self) -> BackboardResult<()> {
        self.run(TransactionMode::ReadWrite, |store| store.clear())
    }

    pub fn index(&self, name: &str) -> BackboardResult<DatabaseIndex> {
        if !self.database.index_names(&self.name)?.iter().any(|n| n == name) {
            return Err(BackboardError::new(
                &format!("Index '{}' not found on object store '{}'", name, self.name),
                ErrorKind::NotFoundError,
            ));
        }
        Ok(DatabaseIndex {
            store: self.clone(),
            name: name.to_string(),
        })
    }

    fn run<R>(
        &self,
        mode: TransactionMode,
        request: impl FnOnce(&ObjectStore) -> BackboardResult<R>,
    ) -> BackboardResult<R> {
        let transaction = self.database.tx(&[&self.name], mode)?;
        let store = transaction.store(&self.name)?;
        match request(&store) {
            Ok(result) => {
                transaction.complete()?;
                Ok(result)
            }
            Err(error) => {
                if let Err(e) = transaction.abort() {
                    log::debug!("Abort after failed request on '{}': {}", self.name, e);
                }
                Err(error)
            }
        }
    }
}

/// Index counterpart of [`DatabaseStore`].
#[derive(Clone)]
pub struct DatabaseIndex {
    store: DatabaseStore,
    name: String,
}

impl DatabaseIndex {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, query: impl Into<KeyRange>) -> BackboardResult<Option<Value>> {
        let query = query.into();
        self.store
            .run(TransactionMode::ReadOnly, |store| store.index(&self.name)?.get(query))
    }

    pub fn get_all(&self, query: Option<KeyRange>, limit: Option<usize>) -> BackboardResult<Vec<Value>> {
        self.store
            .run(TransactionMode::ReadOnly, |store| store.index(&self.name)?.get_all(query, limit))
    }

    pub fn count(&self, query: Option<KeyRange>) -> BackboardResult<usize> {
        self.store
            .run(TransactionMode::ReadOnly, |store| store.index(&self.name)?.count(query))
    }
}
