use crate::common::{Key, KeyPath, KeyRange};
use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use crate::transaction::Transaction;
use serde_json::Value;

/// Accessor for one object store within a [`Transaction`].
///
/// Every request is forwarded to the engine as is; its errors come back
/// unmodified. Holding an accessor keeps the transaction alive.
#[derive(Clone)]
pub struct ObjectStore {
    name: String,
    transaction: Transaction,
}

impl ObjectStore {
    pub(crate) fn new(name: &str, transaction: Transaction) -> Self {
        ObjectStore {
            name: name.to_string(),
            transaction,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// First record matching `query`.
    pub fn get(&self, query: impl Into<KeyRange>) -> BackboardResult<Option<Value>> {
        self.transaction.engine().get(&self.name, &query.into())
    }

    /// Records matching `query`, every record if `None`, in key order.
    pub fn get_all(&self, query: Option<KeyRange>, limit: Option<usize>) -> BackboardResult<Vec<Value>> {
        self.transaction.engine().get_all(&self.name, query.as_ref(), limit)
    }

    pub fn get_all_keys(&self, query: Option<KeyRange>, limit: Option<usize>) -> BackboardResult<Vec<Key>> {
        self.transaction.engine().get_all_keys(&self.name, query.as_ref(), limit)
    }

    pub fn count(&self, query: Option<KeyRange>) -> BackboardResult<usize> {
        self.transaction.engine().count(&self.name, query.as_ref())
    }

    /// Inserts or replaces a record whose key comes from the store's key path
    /// or key generator.
    pub fn put(&self, value: Value) -> BackboardResult<Key> {
        self.transaction.engine().put(&self.name, value, None)
    }

    /// Inserts or replaces a record under an out-of-line key.
    pub fn put_with_key(&self, value: Value, key: impl Into<Key>) -> BackboardResult<Key> {
        self.transaction.engine().put(&self.name, value, Some(key.into()))
    }

    /// Inserts a record; fails with `ConstraintError` if its key exists.
    pub fn add(&self, value: Value) -> BackboardResult<Key> {
        self.transaction.engine().add(&self.name, value, None)
    }

    pub fn add_with_key(&self, value: Value, key: impl Into<Key>) -> BackboardResult<Key> {
        self.transaction.engine().add(&self.name, value, Some(key.into()))
    }

    /// Deletes every record matching `query`.
    pub fn delete(&self, query: impl Into<KeyRange>) -> BackboardResult<()> {
        self.transaction.engine().delete(&self.name, &query.into())
    }

    pub fn clear(&self) -> BackboardResult<()> {
        self.transaction.engine().clear(&self.name)
    }

    /// Accessor for an index of this store.
    pub fn index(&self, name: &str) -> BackboardResult<Index> {
        if !self.index_names()?.iter().any(|n| n == name) {
            return Err(BackboardError::new(
                &format!("Index '{}' not found on object store '{}'", name, self.name),
                ErrorKind::NotFoundError,
            ));
        }
        Ok(Index {
            store: self.clone(),
            name: name.to_string(),
        })
    }

    pub fn index_names(&self) -> BackboardResult<Vec<String>> {
        self.transaction.engine().index_names(&self.name)
    }

    pub fn key_path(&self) -> BackboardResult<Option<KeyPath>> {
        self.transaction.engine().key_path(&self.name)
    }

    pub fn auto_increment(&self) -> BackboardResult<bool> {
        self.transaction.engine().auto_increment(&self.name)
    }
}

/// Accessor for one index of an [`ObjectStore`]. Queries match index keys.
#[derive(Clone)]
pub struct Index {
    store: ObjectStore,
    name: String,
}

impl Index {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First record, by index key then primary key, matching `query`.
    pub fn get(&self, query: impl Into<KeyRange>) -> BackboardResult<Option<Value>> {
        self.engine_call(|store, engine| engine.index_get(store, &self.name, &query.into()))
    }

    pub fn get_all(&self, query: Option<KeyRange>, limit: Option<usize>) -> BackboardResult<Vec<Value>> {
        self.engine_call(|store, engine| engine.index_get_all(store, &self.name, query.as_ref(), limit))
    }

    pub fn count(&self, query: Option<KeyRange>) -> BackboardResult<usize> {
        self.engine_call(|store, engine| engine.index_count(store, &self.name, query.as_ref()))
    }

    fn engine_call<R>(
        &self,
        f: impl FnOnce(&str, &dyn crate::engine::EngineTransaction) -> BackboardResult<R>,
    ) -> BackboardResult<R> {
        f(&self.store.name, self.store.transaction.engine().as_ref())
    }
}
