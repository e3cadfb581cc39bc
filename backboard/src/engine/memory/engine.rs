use crate::engine::memory::database::{MemoryConnection, MemoryDatabase};
use crate::engine::memory::transaction::MemoryTransaction;
use crate::engine::memory::MemoryEngineConfig;
use crate::engine::{
    DeleteOutcome, EngineConnection, EngineTransaction, OpenObserver, StorageEngine,
    UpgradeTransaction, VersionChangeEvent,
};
use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use dashmap::DashMap;
use itertools::Itertools;
use std::sync::Arc;

/// In-memory implementation of [`StorageEngine`].
///
/// # Purpose
/// `MemoryEngine` keeps every database in process memory. It implements the
/// whole engine contract: versioned open with the blocking handshake,
/// versionchange transactions with store and index primitives, snapshot
/// isolated read-write transactions, an optional quota and deletion that
/// completes once blocking connections close.
///
/// # Characteristics
/// - **Thread-Safe**: databases live in a concurrent map, each behind its own locks
/// - **Cheap Staging**: transactions stage changes on persistent maps
/// - **No Persistence**: all data is lost when the engine is dropped
///
/// # Usage
/// ```text
/// let engine = MemoryEngine::new(MemoryEngineConfig::new());
/// let backboard = Backboard::builder().engine(engine).build();
/// ```
#[derive(Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<MemoryEngineInner>,
}

impl MemoryEngine {
    pub fn new(config: MemoryEngineConfig) -> Self {
        MemoryEngine {
            inner: Arc::new(MemoryEngineInner {
                config,
                databases: DashMap::new(),
            }),
        }
    }

    /// Closes every connection to `name` abnormally, as an engine does when
    /// storage goes away. Returns how many connections were closed.
    pub fn force_close(&self, name: &str) -> usize {
        let database = match self.inner.get(name) {
            Some(database) => database,
            None => return 0,
        };
        let connections = database.open_connections();
        for connection in &connections {
            connection.force_close();
        }
        connections.len()
    }

    /// Number of open connections to `name`.
    pub fn connection_count(&self, name: &str) -> usize {
        self.inner
            .get(name)
            .map(|database| database.open_connections().len())
            .unwrap_or(0)
    }

    fn upgrade(
        &self,
        database: &Arc<MemoryDatabase>,
        connection: Arc<MemoryConnection>,
        event: VersionChangeEvent,
        new_version: u32,
        observer: &dyn OpenObserver,
    ) -> BackboardResult<Arc<dyn EngineConnection>> {
        if !self.inner.request_close(database, &event) {
            observer.on_blocked(&event);
            if database.has_open_connections() {
                log::warn!(
                    "Upgrade of '{}' to version {} is blocked by open connections",
                    database.name(),
                    new_version
                );
                return Err(BackboardError::new(
                    &format!(
                        "Upgrade of '{}' to version {} is blocked by open connections",
                        database.name(),
                        new_version
                    ),
                    ErrorKind::OpenError,
                ));
            }
        }

        database.register(&connection);
        let transaction = MemoryTransaction::upgrade(
            database.clone(),
            event.old_version(),
            new_version,
            self.inner.config.quota(),
        );
        let upgrade: Arc<dyn UpgradeTransaction> = transaction.clone();
        let _guard = UnwindGuard {
            transaction: transaction.clone(),
            connection: connection.clone(),
        };

        let outcome = observer.on_upgrade_needed(&event, upgrade).and_then(|_| {
            if transaction.is_finished() {
                Err(BackboardError::new(
                    "The upgrade transaction was aborted",
                    ErrorKind::AbortError,
                ))
            } else {
                transaction.commit()
            }
        });

        match outcome {
            Ok(()) => {
                log::info!(
                    "Database '{}' upgraded from version {} to {}",
                    database.name(),
                    event.old_version(),
                    new_version
                );
                observer.on_upgrade_complete();
                let connection: Arc<dyn EngineConnection> = connection;
                Ok(connection)
            }
            Err(error) => {
                transaction.abort_with(error.clone());
                connection.close();
                log::warn!("Upgrade of '{}' rolled back: {}", database.name(), error);
                observer.on_upgrade_aborted(&error);
                Err(error)
            }
        }
    }
}

impl StorageEngine for MemoryEngine {
    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        observer: &dyn OpenObserver,
    ) -> BackboardResult<Arc<dyn EngineConnection>> {
        if version == Some(0) {
            return Err(BackboardError::new(
                "The version of a database must be a positive integer",
                ErrorKind::InvalidAccessError,
            ));
        }

        let database = self.inner.get_or_create(name);
        if database.is_pending_delete() {
            return Err(BackboardError::new(
                &format!("Database '{}' is waiting to be deleted", name),
                ErrorKind::InvalidStateError,
            ));
        }

        let current = database.version();
        let requested = version.unwrap_or(current.max(1));
        if requested < current {
            return Err(BackboardError::new(
                &format!(
                    "Requested version {} of '{}' is below its current version {}",
                    requested, name, current
                ),
                ErrorKind::VersionError,
            ));
        }

        let connection = MemoryConnection::new(
            database.clone(),
            requested,
            Arc::downgrade(&self.inner),
            self.inner.config.quota(),
        );

        if requested == current {
            database.register(&connection);
            log::debug!("Opened '{}' at version {}", name, current);
            let connection: Arc<dyn EngineConnection> = connection;
            return Ok(connection);
        }

        let event = VersionChangeEvent::new(current, Some(requested));
        self.upgrade(&database, connection, event, requested, observer)
    }

    fn delete_database(&self, name: &str) -> BackboardResult<DeleteOutcome> {
        let database = match self.inner.get(name) {
            Some(database) => database,
            None => {
                log::debug!("Database '{}' does not exist, nothing to delete", name);
                return Ok(DeleteOutcome::NotFound);
            }
        };

        let event = VersionChangeEvent::new(database.version(), None);
        if self.inner.request_close(&database, &event) {
            self.inner.remove(&database);
            log::info!("Database '{}' deleted", name);
            Ok(DeleteOutcome::Deleted)
        } else {
            database.mark_pending_delete();
            log::info!("Deletion of '{}' is blocked until its connections close", name);
            Ok(DeleteOutcome::Blocked)
        }
    }

    fn database_names(&self) -> Vec<String> {
        self.inner
            .databases
            .iter()
            .filter(|entry| !entry.value().is_pending_delete())
            .map(|entry| entry.key().clone())
            .sorted()
            .collect()
    }
}

/// Rolls an upgrade back when the observer panics, so that a database whose
/// creation never committed does not linger.
struct UnwindGuard {
    transaction: Arc<MemoryTransaction>,
    connection: Arc<MemoryConnection>,
}

impl Drop for UnwindGuard {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        log::warn!("Upgrade of '{}' interrupted by a panic, rolling back", self.connection.name());
        self.transaction.abort_with(BackboardError::new(
            "The upgrade was interrupted by a panic",
            ErrorKind::AbortError,
        ));
        self.connection.close();
    }
}

#[derive(Default)]
pub(crate) struct MemoryEngineInner {
    config: MemoryEngineConfig,
    databases: DashMap<String, Arc<MemoryDatabase>>,
}

impl MemoryEngineInner {
    fn get(&self, name: &str) -> Option<Arc<MemoryDatabase>> {
        self.databases.get(name).map(|entry| entry.value().clone())
    }

    fn get_or_create(&self, name: &str) -> Arc<MemoryDatabase> {
        self.databases
            .entry(name.to_string())
            .or_insert_with(|| MemoryDatabase::new(name))
            .value()
            .clone()
    }

    /// Asks every open connection to close. Returns true if none is left open.
    fn request_close(&self, database: &Arc<MemoryDatabase>, event: &VersionChangeEvent) -> bool {
        for connection in database.open_connections() {
            connection.notify_version_change(event);
        }
        !database.has_open_connections()
    }

    fn remove(&self, database: &Arc<MemoryDatabase>) {
        self.databases
            .remove_if(database.name(), |_, current| Arc::ptr_eq(current, database));
    }

    /// Called whenever a connection closes: finishes a blocked deletion, and
    /// drops a database whose creation never committed.
    pub(crate) fn release(&self, database: &Arc<MemoryDatabase>) {
        if database.has_open_connections() {
            return;
        }
        if database.is_pending_delete() {
            self.remove(database);
            log::info!("Database '{}' deleted after its last connection closed", database.name());
        } else if database.version() == 0 {
            self.remove(database);
            log::debug!("Database '{}' discarded, it was never created", database.name());
        }
    }
}
