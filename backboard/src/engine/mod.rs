//! Contract between the convenience layer and a versioned object-store engine.
//!
//! The layer never touches storage directly. Everything it needs is expressed
//! by the traits of this module: a [`StorageEngine`] opens connections and
//! deletes databases, an [`EngineConnection`] hands out transactions, and an
//! [`EngineTransaction`] serves requests and reports its outcome through
//! [`TransactionSignal`]s. Structural changes are only available through the
//! [`UpgradeTransaction`] granted during a version bump.
//!
//! [`memory::MemoryEngine`] is a complete in-memory implementation.

pub mod memory;

use crate::common::{Key, KeyPath, KeyRange};
use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use crate::schema::{IndexDefinition, LiveSchemaState, StoreOptions};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

/// Mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
    /// Only ever granted by the engine during an upgrade.
    VersionChange,
}

impl TransactionMode {
    pub fn is_writable(&self) -> bool {
        !matches!(self, TransactionMode::ReadOnly)
    }
}

impl Display for TransactionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionMode::ReadOnly => write!(f, "readonly"),
            TransactionMode::ReadWrite => write!(f, "readwrite"),
            TransactionMode::VersionChange => write!(f, "versionchange"),
        }
    }
}

impl FromStr for TransactionMode {
    type Err = BackboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readonly" => Ok(TransactionMode::ReadOnly),
            "readwrite" => Ok(TransactionMode::ReadWrite),
            "versionchange" => Ok(TransactionMode::VersionChange),
            other => Err(BackboardError::new(
                &format!("Unknown transaction mode '{}'", other),
                ErrorKind::ConfigurationError,
            )),
        }
    }
}

/// Versions carried by upgrade, blocked and version change notifications.
///
/// `new_version` is `None` when the database is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChangeEvent {
    old_version: u32,
    new_version: Option<u32>,
}

impl VersionChangeEvent {
    pub fn new(old_version: u32, new_version: Option<u32>) -> Self {
        VersionChangeEvent {
            old_version,
            new_version,
        }
    }

    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    pub fn new_version(&self) -> Option<u32> {
        self.new_version
    }
}

/// Outcome of a database deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The database existed and is gone.
    Deleted,
    /// There was no database of that name.
    NotFound,
    /// Other connections are still open; deletion completes once they close.
    Blocked,
}

/// Completion signal of an engine transaction. Each transaction emits
/// `Complete`, or `Error` and/or `Abort`, exactly once each at most.
#[derive(Debug, Clone)]
pub enum TransactionSignal {
    Complete,
    Error(BackboardError),
    Abort(BackboardError),
}

/// Receives the completion signals of one transaction.
pub trait TransactionObserver: Send + Sync {
    fn on_signal(&self, signal: TransactionSignal);
}

/// Receives the signals emitted while a connection is being opened.
///
/// All methods are invoked on the caller's stack from inside
/// [`StorageEngine::open`].
pub trait OpenObserver: Send + Sync {
    /// Other connections stayed open after being asked to close for an upgrade.
    fn on_blocked(&self, _event: &VersionChangeEvent) {}

    /// The requested version is above the stored one. Structural changes must
    /// be issued against `transaction` before returning. Returning an error
    /// aborts the upgrade and fails the open with that error.
    fn on_upgrade_needed(
        &self,
        event: &VersionChangeEvent,
        transaction: Arc<dyn UpgradeTransaction>,
    ) -> BackboardResult<()>;

    /// The upgrade transaction committed.
    fn on_upgrade_complete(&self) {}

    /// The upgrade transaction was rolled back.
    fn on_upgrade_aborted(&self, _error: &BackboardError) {}
}

/// Receives notifications addressed to an open connection.
pub trait ConnectionObserver: Send + Sync {
    /// Another party wants to upgrade or delete the database and asks this
    /// connection to close.
    fn on_version_change(&self, event: &VersionChangeEvent);

    /// The engine closed the connection on its own.
    fn on_forced_close(&self) {}
}

/// A versioned object-store engine.
///
/// # Thread Safety
/// Implementers must be `Send + Sync`; one engine is shared by every database
/// handle created from it.
pub trait StorageEngine: Send + Sync {
    /// Opens a connection to `name` at `version`, creating the database if needed.
    ///
    /// With `None` the current version is used (1 for a new database). When the
    /// requested version is above the stored one, the other connections are
    /// notified through [`ConnectionObserver::on_version_change`]; if any stays
    /// open, [`OpenObserver::on_blocked`] is called and the open fails. Otherwise
    /// an [`UpgradeTransaction`] is handed to
    /// [`OpenObserver::on_upgrade_needed`] and committed once it returns.
    ///
    /// # Returns
    /// * `Ok(connection)` opened at the requested version
    /// * `Err(VersionError)` if the requested version is below the stored one
    /// * `Err(..)` from the observer or from the upgrade commit; the upgrade is rolled back
    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        observer: &dyn OpenObserver,
    ) -> BackboardResult<Arc<dyn EngineConnection>>;

    /// Deletes the named database.
    ///
    /// Open connections are first notified through
    /// [`ConnectionObserver::on_version_change`] with no new version.
    fn delete_database(&self, name: &str) -> BackboardResult<DeleteOutcome>;

    /// Names of the existing databases, sorted.
    fn database_names(&self) -> Vec<String>;
}

/// An open connection to one database.
pub trait EngineConnection: Send + Sync {
    fn name(&self) -> String;

    fn version(&self) -> u32;

    /// Store names, sorted.
    fn object_store_names(&self) -> Vec<String>;

    /// Committed structure of the database.
    fn schema(&self) -> LiveSchemaState;

    /// Starts a transaction over `store_names`.
    ///
    /// # Returns
    /// * `Err(InvalidStateError)` if the connection is closed
    /// * `Err(InvalidAccessError)` for an empty scope or the `VersionChange` mode
    /// * `Err(NotFoundError)` if a store does not exist
    fn transaction(
        &self,
        store_names: &[String],
        mode: TransactionMode,
    ) -> BackboardResult<Arc<dyn EngineTransaction>>;

    fn set_observer(&self, observer: Arc<dyn ConnectionObserver>);

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A live transaction.
///
/// Every request fails with `TransactionInactiveError` once the transaction has
/// finished. A failing request does not abort the transaction.
pub trait EngineTransaction: Send + Sync {
    fn mode(&self) -> TransactionMode;

    /// Stores in scope; for an upgrade transaction, every current store.
    fn store_names(&self) -> Vec<String>;

    fn set_observer(&self, observer: Arc<dyn TransactionObserver>);

    fn is_finished(&self) -> bool;

    /// First record in `query`.
    fn get(&self, store: &str, query: &KeyRange) -> BackboardResult<Option<Value>>;

    /// Records in `query` (all if `None`) in key order; a `limit` of 0 means no limit.
    fn get_all(
        &self,
        store: &str,
        query: Option<&KeyRange>,
        limit: Option<usize>,
    ) -> BackboardResult<Vec<Value>>;

    fn get_all_keys(
        &self,
        store: &str,
        query: Option<&KeyRange>,
        limit: Option<usize>,
    ) -> BackboardResult<Vec<Key>>;

    fn count(&self, store: &str, query: Option<&KeyRange>) -> BackboardResult<usize>;

    /// Inserts or replaces a record, returning its key.
    fn put(&self, store: &str, value: Value, key: Option<Key>) -> BackboardResult<Key>;

    /// Inserts a record; fails with `ConstraintError` if the key exists.
    fn add(&self, store: &str, value: Value, key: Option<Key>) -> BackboardResult<Key>;

    fn delete(&self, store: &str, query: &KeyRange) -> BackboardResult<()>;

    fn clear(&self, store: &str) -> BackboardResult<()>;

    fn index_get(&self, store: &str, index: &str, query: &KeyRange) -> BackboardResult<Option<Value>>;

    fn index_get_all(
        &self,
        store: &str,
        index: &str,
        query: Option<&KeyRange>,
        limit: Option<usize>,
    ) -> BackboardResult<Vec<Value>>;

    fn index_count(&self, store: &str, index: &str, query: Option<&KeyRange>) -> BackboardResult<usize>;

    fn index_names(&self, store: &str) -> BackboardResult<Vec<String>>;

    fn key_path(&self, store: &str) -> BackboardResult<Option<KeyPath>>;

    fn auto_increment(&self, store: &str) -> BackboardResult<bool>;

    /// Requests the commit. Signals `Complete` on success, `Error` followed by
    /// `Abort` on failure.
    fn commit(&self) -> BackboardResult<()>;

    /// Requests an abort, rolling back every change. Signals `Abort`.
    fn abort(&self) -> BackboardResult<()>;
}

/// The transaction granted during a version bump. Structural primitives are
/// only valid here; everywhere else they fail with `InvalidStateError`.
pub trait UpgradeTransaction: EngineTransaction {
    fn old_version(&self) -> u32;

    fn new_version(&self) -> u32;

    /// Structure as modified so far by this transaction.
    fn schema(&self) -> LiveSchemaState;

    fn create_object_store(&self, name: &str, options: &StoreOptions) -> BackboardResult<()>;

    fn delete_object_store(&self, name: &str) -> BackboardResult<()>;

    fn create_index(&self, store: &str, name: &str, definition: &IndexDefinition) -> BackboardResult<()>;

    fn delete_index(&self, store: &str, name: &str) -> BackboardResult<()>;

    /// The same transaction viewed as a plain [`EngineTransaction`].
    fn as_transaction(&self) -> BackboardResult<Arc<dyn EngineTransaction>>;
}
