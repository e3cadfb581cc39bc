use crate::common::{Key, KeyPath, KeyRange};
use crate::engine::memory::database::{DatabaseState, MemoryDatabase, StoreState};
use crate::engine::{
    EngineTransaction, TransactionMode, TransactionObserver, TransactionSignal, UpgradeTransaction,
};
use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use crate::schema::{IndexDefinition, LiveSchemaState, StoreOptions};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Transaction of the memory engine.
///
/// Requests work on a private copy of the database state taken when the
/// transaction starts; the copy is published on commit and dropped on abort.
pub(crate) struct MemoryTransaction {
    id: Uuid,
    mode: TransactionMode,
    scope: Vec<String>,
    versions: (u32, u32),
    database: Arc<MemoryDatabase>,
    quota: Option<usize>,
    staged: Mutex<DatabaseState>,
    finished: AtomicBool,
    observer: RwLock<Option<Arc<dyn TransactionObserver>>>,
    this: Weak<MemoryTransaction>,
}

impl MemoryTransaction {
    pub(crate) fn new(
        database: Arc<MemoryDatabase>,
        state: DatabaseState,
        scope: Vec<String>,
        mode: TransactionMode,
        quota: Option<usize>,
    ) -> Arc<Self> {
        let version = state.version;
        Self::create(database, state, scope, mode, (version, version), quota)
    }

    /// The versionchange transaction moving the database from `old_version`
    /// to `new_version`.
    pub(crate) fn upgrade(
        database: Arc<MemoryDatabase>,
        old_version: u32,
        new_version: u32,
        quota: Option<usize>,
    ) -> Arc<Self> {
        let mut state = database.snapshot();
        state.version = new_version;
        Self::create(
            database,
            state,
            Vec::new(),
            TransactionMode::VersionChange,
            (old_version, new_version),
            quota,
        )
    }

    fn create(
        database: Arc<MemoryDatabase>,
        state: DatabaseState,
        scope: Vec<String>,
        mode: TransactionMode,
        versions: (u32, u32),
        quota: Option<usize>,
    ) -> Arc<Self> {
        let transaction = Arc::new_cyclic(|this| MemoryTransaction {
            id: Uuid::new_v4(),
            mode,
            scope,
            versions,
            database,
            quota,
            staged: Mutex::new(state),
            finished: AtomicBool::new(false),
            observer: RwLock::new(None),
            this: this.clone(),
        });
        log::debug!(
            "Transaction {} started on '{}' ({})",
            transaction.id,
            transaction.database.name(),
            mode
        );
        transaction
    }

    /// Aborts with `error` as the reason, unless the transaction already finished.
    pub(crate) fn abort_with(&self, error: BackboardError) {
        if self.finish() {
            *self.staged.lock() = DatabaseState::default();
            log::debug!("Transaction {} aborted: {}", self.id, error);
            self.signal(TransactionSignal::Abort(error));
        }
    }

    fn finish(&self) -> bool {
        !self.finished.swap(true, Ordering::SeqCst)
    }

    fn signal(&self, signal: TransactionSignal) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.on_signal(signal);
        }
    }

    fn ensure_active(&self) -> BackboardResult<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(BackboardError::new(
                "The transaction has finished",
                ErrorKind::TransactionInactiveError,
            ));
        }
        Ok(())
    }

    fn ensure_upgrade(&self) -> BackboardResult<()> {
        if self.mode != TransactionMode::VersionChange {
            return Err(BackboardError::new(
                "Structural changes are only allowed in a versionchange transaction",
                ErrorKind::InvalidStateError,
            ));
        }
        self.ensure_active()
    }

    fn ensure_scope(&self, store: &str) -> BackboardResult<()> {
        if self.mode != TransactionMode::VersionChange && !self.scope.iter().any(|s| s == store) {
            return Err(not_found(&format!(
                "Object store '{}' is not in the scope of the transaction",
                store
            )));
        }
        Ok(())
    }

    fn with_store<R>(
        &self,
        store: &str,
        f: impl FnOnce(&StoreState) -> BackboardResult<R>,
    ) -> BackboardResult<R> {
        let staged = self.staged.lock();
        self.ensure_active()?;
        self.ensure_scope(store)?;
        let state = staged
            .stores
            .get(store)
            .ok_or_else(|| not_found(&format!("Object store '{}' not found", store)))?;
        f(state)
    }

    /// Runs a write against a copy of the store, keeping it only on success.
    fn with_store_mut<R>(
        &self,
        store: &str,
        f: impl FnOnce(&mut StoreState) -> BackboardResult<R>,
    ) -> BackboardResult<R> {
        let mut staged = self.staged.lock();
        self.ensure_active()?;
        self.ensure_scope(store)?;
        if !self.mode.is_writable() {
            return Err(BackboardError::new(
                "The transaction is read-only",
                ErrorKind::ReadOnlyError,
            ));
        }
        let mut updated = staged
            .stores
            .get(store)
            .cloned()
            .ok_or_else(|| not_found(&format!("Object store '{}' not found", store)))?;
        let result = f(&mut updated)?;
        staged.stores.insert(store.to_string(), updated);
        Ok(result)
    }
}

impl EngineTransaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn store_names(&self) -> Vec<String> {
        match self.mode {
            TransactionMode::VersionChange => self.staged.lock().store_names(),
            _ => self.scope.clone(),
        }
    }

    fn set_observer(&self, observer: Arc<dyn TransactionObserver>) {
        *self.observer.write() = Some(observer);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn get(&self, store: &str, query: &KeyRange) -> BackboardResult<Option<Value>> {
        self.with_store(store, |state| {
            let found = match query.single_key() {
                Some(key) => state.get(key),
                None => state.records_in(Some(query)).next().map(|(_, value)| value),
            };
            Ok(found.cloned())
        })
    }

    fn get_all(
        &self,
        store: &str,
        query: Option<&KeyRange>,
        limit: Option<usize>,
    ) -> BackboardResult<Vec<Value>> {
        self.with_store(store, |state| {
            Ok(state
                .records_in(query)
                .take(effective_limit(limit))
                .map(|(_, value)| value.clone())
                .collect())
        })
    }

    fn get_all_keys(
        &self,
        store: &str,
        query: Option<&KeyRange>,
        limit: Option<usize>,
    ) -> BackboardResult<Vec<Key>> {
        self.with_store(store, |state| {
            Ok(state
                .records_in(query)
                .take(effective_limit(limit))
                .map(|(key, _)| key.clone())
                .collect())
        })
    }

    fn count(&self, store: &str, query: Option<&KeyRange>) -> BackboardResult<usize> {
        self.with_store(store, |state| Ok(state.records_in(query).count()))
    }

    fn put(&self, store: &str, value: Value, key: Option<Key>) -> BackboardResult<Key> {
        self.with_store_mut(store, |state| state.store_record(value, key, true))
    }

    fn add(&self, store: &str, value: Value, key: Option<Key>) -> BackboardResult<Key> {
        self.with_store_mut(store, |state| state.store_record(value, key, false))
    }

    fn delete(&self, store: &str, query: &KeyRange) -> BackboardResult<()> {
        self.with_store_mut(store, |state| {
            let keys: Vec<Key> = state.records_in(Some(query)).map(|(key, _)| key.clone()).collect();
            for key in &keys {
                state.remove(key);
            }
            Ok(())
        })
    }

    fn clear(&self, store: &str) -> BackboardResult<()> {
        self.with_store_mut(store, |state| {
            state.clear();
            Ok(())
        })
    }

    fn index_get(&self, store: &str, index: &str, query: &KeyRange) -> BackboardResult<Option<Value>> {
        self.with_store(store, |state| {
            let entries = state.index_entries(index, Some(query))?;
            Ok(entries.first().map(|(_, _, value)| (*value).clone()))
        })
    }

    fn index_get_all(
        &self,
        store: &str,
        index: &str,
        query: Option<&KeyRange>,
        limit: Option<usize>,
    ) -> BackboardResult<Vec<Value>> {
        self.with_store(store, |state| {
            Ok(state
                .index_entries(index, query)?
                .into_iter()
                .take(effective_limit(limit))
                .map(|(_, _, value)| value.clone())
                .collect())
        })
    }

    fn index_count(&self, store: &str, index: &str, query: Option<&KeyRange>) -> BackboardResult<usize> {
        self.with_store(store, |state| Ok(state.index_entries(index, query)?.len()))
    }

    fn index_names(&self, store: &str) -> BackboardResult<Vec<String>> {
        self.with_store(store, |state| Ok(state.index_names()))
    }

    fn key_path(&self, store: &str) -> BackboardResult<Option<KeyPath>> {
        self.with_store(store, |state| Ok(state.key_path().cloned()))
    }

    fn auto_increment(&self, store: &str) -> BackboardResult<bool> {
        self.with_store(store, |state| Ok(state.auto_increment()))
    }

    fn commit(&self) -> BackboardResult<()> {
        if !self.finish() {
            return Err(BackboardError::new(
                "The transaction has already finished",
                ErrorKind::InvalidStateError,
            ));
        }

        let staged = std::mem::take(&mut *self.staged.lock());
        let result = if self.mode.is_writable() {
            self.database.commit(staged, self.mode, &self.scope, self.quota)
        } else {
            Ok(())
        };

        match &result {
            Ok(()) => {
                log::debug!("Transaction {} committed", self.id);
                self.signal(TransactionSignal::Complete);
            }
            Err(error) => {
                log::warn!("Transaction {} failed to commit: {}", self.id, error);
                self.signal(TransactionSignal::Error(error.clone()));
                self.signal(TransactionSignal::Abort(error.clone()));
            }
        }
        result
    }

    fn abort(&self) -> BackboardResult<()> {
        if self.is_finished() {
            return Err(BackboardError::new(
                "The transaction has already finished",
                ErrorKind::InvalidStateError,
            ));
        }
        self.abort_with(BackboardError::new("The transaction was aborted", ErrorKind::AbortError));
        Ok(())
    }
}

impl UpgradeTransaction for MemoryTransaction {
    fn old_version(&self) -> u32 {
        self.versions.0
    }

    fn new_version(&self) -> u32 {
        self.versions.1
    }

    fn schema(&self) -> LiveSchemaState {
        self.staged.lock().live_schema()
    }

    fn create_object_store(&self, name: &str, options: &StoreOptions) -> BackboardResult<()> {
        self.ensure_upgrade()?;
        if let Some(key_path) = options.key_path() {
            if !key_path.is_valid() {
                return Err(BackboardError::new(
                    &format!("Invalid key path {}", key_path),
                    ErrorKind::DataError,
                ));
            }
            if options.auto_increment() && (key_path.is_empty_path() || key_path.is_compound()) {
                return Err(BackboardError::new(
                    &format!("autoIncrement cannot be used with key path {}", key_path),
                    ErrorKind::InvalidAccessError,
                ));
            }
        }

        let mut staged = self.staged.lock();
        if staged.stores.contains_key(name) {
            return Err(BackboardError::new(
                &format!("Object store '{}' already exists", name),
                ErrorKind::ConstraintError,
            ));
        }
        staged.stores.insert(name.to_string(), StoreState::new(options));
        log::debug!("Created object store '{}' in transaction {}", name, self.id);
        Ok(())
    }

    fn delete_object_store(&self, name: &str) -> BackboardResult<()> {
        self.ensure_upgrade()?;
        let mut staged = self.staged.lock();
        if staged.stores.remove(name).is_none() {
            return Err(not_found(&format!("Object store '{}' not found", name)));
        }
        log::debug!("Deleted object store '{}' in transaction {}", name, self.id);
        Ok(())
    }

    fn create_index(&self, store: &str, name: &str, definition: &IndexDefinition) -> BackboardResult<()> {
        self.ensure_upgrade()?;
        if !definition.key_path().is_valid() {
            return Err(BackboardError::new(
                &format!("Invalid key path {}", definition.key_path()),
                ErrorKind::DataError,
            ));
        }
        if definition.is_multi_entry() && definition.key_path().is_compound() {
            return Err(BackboardError::new(
                "A multiEntry index cannot use a compound key path",
                ErrorKind::InvalidAccessError,
            ));
        }

        let mut staged = self.staged.lock();
        let state = staged
            .stores
            .get_mut(store)
            .ok_or_else(|| not_found(&format!("Object store '{}' not found", store)))?;
        if state.has_index(name) {
            return Err(BackboardError::new(
                &format!("Index '{}' already exists on '{}'", name, store),
                ErrorKind::ConstraintError,
            ));
        }
        if definition.is_unique() {
            if let Some(duplicate) = state.find_duplicate(definition) {
                return Err(BackboardError::new(
                    &format!(
                        "Unique index '{}' on '{}' cannot be built, key {} is shared by several records",
                        name, store, duplicate
                    ),
                    ErrorKind::ConstraintError,
                ));
            }
        }
        state.insert_index(name, definition.clone());
        log::debug!("Created index '{}' on '{}' in transaction {}", name, store, self.id);
        Ok(())
    }

    fn delete_index(&self, store: &str, name: &str) -> BackboardResult<()> {
        self.ensure_upgrade()?;
        let mut staged = self.staged.lock();
        let state = staged
            .stores
            .get_mut(store)
            .ok_or_else(|| not_found(&format!("Object store '{}' not found", store)))?;
        if state.remove_index(name).is_none() {
            return Err(not_found(&format!("Index '{}' not found on '{}'", name, store)));
        }
        log::debug!("Deleted index '{}' on '{}' in transaction {}", name, store, self.id);
        Ok(())
    }

    fn as_transaction(&self) -> BackboardResult<Arc<dyn EngineTransaction>> {
        let transaction: Arc<dyn EngineTransaction> = self.this.upgrade().ok_or_else(|| {
            BackboardError::new("The upgrade transaction is gone", ErrorKind::InternalError)
        })?;
        Ok(transaction)
    }
}

/// A limit of zero or none means every record.
fn effective_limit(limit: Option<usize>) -> usize {
    limit.filter(|l| *l > 0).unwrap_or(usize::MAX)
}

fn not_found(message: &str) -> BackboardError {
    BackboardError::new(message, ErrorKind::NotFoundError)
}
