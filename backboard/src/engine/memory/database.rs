use crate::common::{Key, KeyPath, KeyRange};
use crate::engine::memory::engine::MemoryEngineInner;
use crate::engine::memory::transaction::MemoryTransaction;
use crate::engine::{
    ConnectionObserver, EngineConnection, EngineTransaction, TransactionMode, VersionChangeEvent,
};
use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use crate::schema::{IndexDefinition, LiveSchemaState, StoreOptions};
use im::OrdMap;
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Largest key a key generator hands out (2^53).
const MAX_GENERATED_KEY: u64 = 9_007_199_254_740_992;

/// Contents of one object store. Cloning is cheap: records live in a persistent map.
#[derive(Debug, Clone)]
pub(crate) struct StoreState {
    key_path: Option<KeyPath>,
    auto_increment: bool,
    next_key: u64,
    indexes: BTreeMap<String, IndexDefinition>,
    records: OrdMap<Key, Value>,
}

impl StoreState {
    pub(crate) fn new(options: &StoreOptions) -> Self {
        StoreState {
            key_path: options.key_path().cloned(),
            auto_increment: options.auto_increment(),
            next_key: 1,
            indexes: BTreeMap::new(),
            records: OrdMap::new(),
        }
    }

    pub(crate) fn options(&self) -> StoreOptions {
        StoreOptions::new(self.key_path.clone(), self.auto_increment)
    }

    pub(crate) fn key_path(&self) -> Option<&KeyPath> {
        self.key_path.as_ref()
    }

    pub(crate) fn auto_increment(&self) -> bool {
        self.auto_increment
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    pub(crate) fn has_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    pub(crate) fn insert_index(&mut self, name: &str, definition: IndexDefinition) {
        self.indexes.insert(name.to_string(), definition);
    }

    pub(crate) fn remove_index(&mut self, name: &str) -> Option<IndexDefinition> {
        self.indexes.remove(name)
    }

    pub(crate) fn get(&self, key: &Key) -> Option<&Value> {
        self.records.get(key)
    }

    pub(crate) fn records_in<'a>(
        &'a self,
        range: Option<&'a KeyRange>,
    ) -> impl Iterator<Item = (&'a Key, &'a Value)> + 'a {
        self.records
            .iter()
            .filter(move |(key, _)| range.map_or(true, |r| r.includes(key)))
    }

    pub(crate) fn remove(&mut self, key: &Key) {
        self.records.remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.records = OrdMap::new();
    }

    /// Entries of an index within `range`, sorted by index key then primary key.
    pub(crate) fn index_entries<'a>(
        &'a self,
        index: &str,
        range: Option<&KeyRange>,
    ) -> BackboardResult<Vec<(Key, &'a Key, &'a Value)>> {
        let definition = self.indexes.get(index).ok_or_else(|| {
            BackboardError::new(&format!("Index '{}' not found", index), ErrorKind::NotFoundError)
        })?;

        let entries = self
            .records
            .iter()
            .flat_map(|(primary, record)| {
                index_keys(definition, record)
                    .into_iter()
                    .map(move |index_key| (index_key, primary, record))
            })
            .filter(|(index_key, _, _)| range.map_or(true, |r| r.includes(index_key)))
            .sorted_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
            .collect();
        Ok(entries)
    }

    /// First index key shared by two records, if any.
    pub(crate) fn find_duplicate(&self, definition: &IndexDefinition) -> Option<Key> {
        let mut seen = BTreeSet::new();
        for record in self.records.values() {
            for key in index_keys(definition, record) {
                if !seen.insert(key.clone()) {
                    return Some(key);
                }
            }
        }
        None
    }

    /// Writes a record, resolving its key from the key path, the explicit key or
    /// the key generator. With `overwrite` unset an existing key is a
    /// `ConstraintError`.
    pub(crate) fn store_record(
        &mut self,
        mut value: Value,
        key: Option<Key>,
        overwrite: bool,
    ) -> BackboardResult<Key> {
        let key = match (self.key_path.clone(), key) {
            (Some(path), Some(_)) => {
                return Err(data_error(&format!(
                    "Object store uses the in-line key path {} and cannot take an explicit key",
                    path
                )))
            }
            (Some(path), None) => match path.extract(&value) {
                Some(key) => key,
                None if self.auto_increment && path.extract_raw(&value).is_none() => {
                    let key = self.generate_key()?;
                    path.inject(&mut value, &key)?;
                    key
                }
                None => {
                    return Err(data_error(&format!(
                        "Evaluating the key path {} did not yield a valid key",
                        path
                    )))
                }
            },
            (None, Some(key)) => key,
            (None, None) if self.auto_increment => self.generate_key()?,
            (None, None) => {
                return Err(data_error(
                    "Object store uses out-of-line keys and has no key generator, a key is required",
                ))
            }
        };

        if self.auto_increment {
            self.bump_generator(&key);
        }

        if !overwrite && self.records.contains_key(&key) {
            return Err(BackboardError::new(
                &format!("Key {} already exists in the object store", key),
                ErrorKind::ConstraintError,
            ));
        }
        self.check_unique(&key, &value)?;

        self.records.insert(key.clone(), value);
        Ok(key)
    }

    fn check_unique(&self, key: &Key, value: &Value) -> BackboardResult<()> {
        for (name, definition) in self.indexes.iter().filter(|(_, d)| d.is_unique()) {
            let wanted = index_keys(definition, value);
            if wanted.is_empty() {
                continue;
            }
            let collision = self
                .records
                .iter()
                .filter(|(primary, _)| *primary != key)
                .any(|(_, record)| index_keys(definition, record).iter().any(|k| wanted.contains(k)));
            if collision {
                return Err(BackboardError::new(
                    &format!("Unique index '{}' already contains the record's index key", name),
                    ErrorKind::ConstraintError,
                ));
            }
        }
        Ok(())
    }

    fn generate_key(&mut self) -> BackboardResult<Key> {
        if self.next_key > MAX_GENERATED_KEY {
            return Err(BackboardError::new(
                "The key generator of the object store is exhausted",
                ErrorKind::ConstraintError,
            ));
        }
        let key = Key::from(self.next_key);
        self.next_key += 1;
        Ok(key)
    }

    fn bump_generator(&mut self, key: &Key) {
        if let Some(number) = key.as_number() {
            if number >= self.next_key as f64 {
                let next = number.floor() + 1.0;
                self.next_key = if next > MAX_GENERATED_KEY as f64 {
                    MAX_GENERATED_KEY + 1
                } else {
                    next as u64
                };
            }
        }
    }
}

/// Keys a record contributes to an index. A multi-entry index over an array
/// contributes every distinct valid element.
pub(crate) fn index_keys(definition: &IndexDefinition, value: &Value) -> Vec<Key> {
    if definition.is_multi_entry() {
        if let Some(Value::Array(items)) = definition.key_path().extract_raw(value) {
            return items.iter().filter_map(Key::from_value).sorted().dedup().collect();
        }
    }
    definition.key_path().extract(value).into_iter().collect()
}

/// Committed or staged state of a database.
#[derive(Debug, Clone, Default)]
pub(crate) struct DatabaseState {
    pub(crate) version: u32,
    pub(crate) stores: OrdMap<String, StoreState>,
}

impl DatabaseState {
    pub(crate) fn live_schema(&self) -> LiveSchemaState {
        let mut live = LiveSchemaState::new();
        for (name, store) in self.stores.iter() {
            live.insert_store(name, store.options());
            for (index, definition) in store.indexes.iter() {
                live.insert_index(name, index, definition.clone());
            }
        }
        live
    }

    pub(crate) fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    /// Serialized size of every record.
    fn size(&self) -> BackboardResult<usize> {
        let mut size = 0;
        for store in self.stores.values() {
            for record in store.records.values() {
                size += serde_json::to_string(record)?.len();
            }
        }
        Ok(size)
    }
}

/// A database of the memory engine: its committed state and its connections.
pub(crate) struct MemoryDatabase {
    name: String,
    state: RwLock<DatabaseState>,
    connections: Mutex<Vec<Weak<MemoryConnection>>>,
    pending_delete: AtomicBool,
}

impl MemoryDatabase {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Arc::new(MemoryDatabase {
            name: name.to_string(),
            state: RwLock::new(DatabaseState::default()),
            connections: Mutex::new(Vec::new()),
            pending_delete: AtomicBool::new(false),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn version(&self) -> u32 {
        self.state.read().version
    }

    pub(crate) fn snapshot(&self) -> DatabaseState {
        self.state.read().clone()
    }

    pub(crate) fn register(&self, connection: &Arc<MemoryConnection>) {
        self.connections.lock().push(Arc::downgrade(connection));
    }

    fn unregister(&self, id: &Uuid) {
        self.connections.lock().retain(|weak| match weak.upgrade() {
            Some(connection) => &connection.id != id,
            None => false,
        });
    }

    /// Connections still open, in the order they were opened.
    pub(crate) fn open_connections(&self) -> Vec<Arc<MemoryConnection>> {
        let mut connections = self.connections.lock();
        connections.retain(|weak| weak.upgrade().is_some_and(|c| !c.is_closed()));
        connections.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn has_open_connections(&self) -> bool {
        !self.open_connections().is_empty()
    }

    pub(crate) fn is_pending_delete(&self) -> bool {
        self.pending_delete.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_pending_delete(&self) {
        self.pending_delete.store(true, Ordering::SeqCst);
    }

    /// Publishes a transaction's staged state.
    ///
    /// An upgrade replaces the whole state; a read-write transaction replaces the
    /// stores in its scope.
    pub(crate) fn commit(
        &self,
        staged: DatabaseState,
        mode: TransactionMode,
        scope: &[String],
        quota: Option<usize>,
    ) -> BackboardResult<()> {
        let mut committed = self.state.write();
        let next = match mode {
            TransactionMode::VersionChange => staged,
            _ => {
                let mut next = committed.clone();
                for name in scope {
                    if let Some(store) = staged.stores.get(name.as_str()) {
                        next.stores.insert(name.clone(), store.clone());
                    }
                }
                next
            }
        };

        if let Some(quota) = quota {
            let size = next.size()?;
            if size > quota {
                return Err(BackboardError::new(
                    &format!(
                        "Database '{}' would use {} bytes, exceeding its quota of {} bytes",
                        self.name, size, quota
                    ),
                    ErrorKind::QuotaExceededError,
                ));
            }
        }

        *committed = next;
        Ok(())
    }
}

/// Connection to a [`MemoryDatabase`].
pub(crate) struct MemoryConnection {
    id: Uuid,
    version: u32,
    database: Arc<MemoryDatabase>,
    engine: Weak<MemoryEngineInner>,
    quota: Option<usize>,
    closed: AtomicBool,
    observer: RwLock<Option<Arc<dyn ConnectionObserver>>>,
}

impl MemoryConnection {
    pub(crate) fn new(
        database: Arc<MemoryDatabase>,
        version: u32,
        engine: Weak<MemoryEngineInner>,
        quota: Option<usize>,
    ) -> Arc<Self> {
        Arc::new(MemoryConnection {
            id: Uuid::new_v4(),
            version,
            database,
            engine,
            quota,
            closed: AtomicBool::new(false),
            observer: RwLock::new(None),
        })
    }

    pub(crate) fn notify_version_change(&self, event: &VersionChangeEvent) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.on_version_change(event);
        }
    }

    /// Closes the connection without being asked to, notifying its observer.
    pub(crate) fn force_close(&self) {
        if self.shut_down() {
            log::warn!("Connection {} to '{}' was closed by the engine", self.id, self.database.name());
            let observer = self.observer.read().clone();
            if let Some(observer) = observer {
                observer.on_forced_close();
            }
        }
    }

    fn shut_down(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.database.unregister(&self.id);
        if let Some(engine) = self.engine.upgrade() {
            engine.release(&self.database);
        }
        true
    }
}

impl EngineConnection for MemoryConnection {
    fn name(&self) -> String {
        self.database.name().to_string()
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn object_store_names(&self) -> Vec<String> {
        self.database.snapshot().store_names()
    }

    fn schema(&self) -> LiveSchemaState {
        self.database.snapshot().live_schema()
    }

    fn transaction(
        &self,
        store_names: &[String],
        mode: TransactionMode,
    ) -> BackboardResult<Arc<dyn EngineTransaction>> {
        if self.is_closed() {
            return Err(BackboardError::new(
                &format!("The connection to '{}' is closed", self.database.name()),
                ErrorKind::InvalidStateError,
            ));
        }
        if mode == TransactionMode::VersionChange {
            return Err(BackboardError::new(
                "A versionchange transaction can only be started by an upgrade",
                ErrorKind::InvalidAccessError,
            ));
        }
        if store_names.is_empty() {
            return Err(BackboardError::new(
                "The transaction scope is empty",
                ErrorKind::InvalidAccessError,
            ));
        }

        let state = self.database.snapshot();
        if let Some(missing) = store_names.iter().find(|n| !state.stores.contains_key(n.as_str())) {
            return Err(BackboardError::new(
                &format!("Object store '{}' not found", missing),
                ErrorKind::NotFoundError,
            ));
        }

        let scope: Vec<String> = store_names.iter().unique().cloned().collect();
        let transaction: Arc<dyn EngineTransaction> =
            MemoryTransaction::new(self.database.clone(), state, scope, mode, self.quota);
        Ok(transaction)
    }

    fn set_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        *self.observer.write() = Some(observer);
    }

    fn close(&self) {
        if self.shut_down() {
            log::debug!("Connection {} to '{}' closed", self.id, self.database.name());
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn data_error(message: &str) -> BackboardError {
    BackboardError::new(message, ErrorKind::DataError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn players() -> StoreState {
        StoreState::new(&StoreOptions::new(Some(KeyPath::from("pid")), true))
    }

    #[test]
    fn generated_key_is_injected() {
        let mut store = players();
        let key = store.store_record(json!({"name": "John"}), None, false).unwrap();
        assert_eq!(key, Key::from(1));
        assert_eq!(store.get(&key), Some(&json!({"name": "John", "pid": 1})));
    }

    #[test]
    fn explicit_numeric_key_bumps_generator() {
        let mut store = players();
        store.store_record(json!({"pid": 10}), None, false).unwrap();
        let key = store.store_record(json!({"name": "next"}), None, false).unwrap();
        assert_eq!(key, Key::from(11));
    }

    #[test]
    fn explicit_key_with_in_line_path_is_rejected() {
        let mut store = players();
        let err = store.store_record(json!({}), Some(Key::from(1)), false).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DataError);
    }

    #[test]
    fn missing_in_line_key_without_generator_is_rejected() {
        let mut store = StoreState::new(&StoreOptions::new(Some(KeyPath::from("gid")), false));
        let err = store.store_record(json!({"name": "x"}), None, false).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DataError);
    }

    #[test]
    fn out_of_line_store_requires_a_key() {
        let mut store = StoreState::new(&StoreOptions::default());
        assert!(store.store_record(json!("value"), None, true).is_err());
        let key = store.store_record(json!("value"), Some(Key::from("k")), true).unwrap();
        assert_eq!(key, Key::from("k"));
    }

    #[test]
    fn add_rejects_existing_key() {
        let mut store = players();
        store.store_record(json!({"pid": 1}), None, false).unwrap();
        let err = store.store_record(json!({"pid": 1}), None, false).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ConstraintError);
        assert!(store.store_record(json!({"pid": 1, "x": 2}), None, true).is_ok());
    }

    #[test]
    fn unique_index_rejects_collision() {
        let mut store = players();
        store.insert_index("name", IndexDefinition::new("name").unique());
        store.store_record(json!({"name": "John"}), None, false).unwrap();
        let err = store.store_record(json!({"name": "John"}), None, false).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ConstraintError);
        // replacing the same record keeps its own index key
        assert!(store.store_record(json!({"pid": 1, "name": "John"}), None, true).is_ok());
    }

    #[test]
    fn multi_entry_index_lists_every_element() {
        let mut store = players();
        store.insert_index("tags", IndexDefinition::new("tags").multi_entry());
        store.store_record(json!({"tags": ["b", "a", "a"]}), None, false).unwrap();
        store.store_record(json!({"tags": ["c"]}), None, false).unwrap();

        let entries = store.index_entries("tags", None).unwrap();
        let keys: Vec<Key> = entries.iter().map(|(k, _, _)| k.clone()).collect();
        assert_eq!(keys, vec![Key::from("a"), Key::from("b"), Key::from("c")]);
    }

    #[test]
    fn find_duplicate_detects_shared_index_keys() {
        let mut store = players();
        store.store_record(json!({"tid": 1}), None, false).unwrap();
        store.store_record(json!({"tid": 2}), None, false).unwrap();
        assert!(store.find_duplicate(&IndexDefinition::new("tid")).is_none());
        store.store_record(json!({"tid": 1}), None, false).unwrap();
        assert_eq!(store.find_duplicate(&IndexDefinition::new("tid")), Some(Key::from(1)));
    }

    #[test]
    fn live_schema_reports_stores_and_indexes() {
        let mut state = DatabaseState::default();
        let mut store = players();
        store.insert_index("tid", IndexDefinition::new("tid"));
        state.stores.insert("players".to_string(), store);
        let live = state.live_schema();
        assert!(live.has_store("players"));
        assert_eq!(live.store("players").unwrap().index_names(), vec!["tid".to_string()]);
    }

    #[test]
    fn commit_respects_quota() {
        let database = MemoryDatabase::new("quota");
        let mut staged = DatabaseState::default();
        let mut store = players();
        store.store_record(json!({"name": "a long enough name"}), None, false).unwrap();
        staged.stores.insert("players".to_string(), store);

        let err = database
            .commit(staged.clone(), TransactionMode::VersionChange, &[], Some(8))
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::QuotaExceededError);
        assert!(database.snapshot().stores.is_empty());

        database.commit(staged, TransactionMode::VersionChange, &[], None).unwrap();
        assert_eq!(database.snapshot().store_names(), vec!["players".to_string()]);
    }
}
