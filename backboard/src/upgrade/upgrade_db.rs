use crate::engine::UpgradeTransaction;
use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use crate::schema::{IndexDefinition, LiveSchemaState, StoreOptions};
use crate::transaction::{QuotaRelay, Transaction};
use itertools::Itertools;
use std::sync::Arc;

/// Database handle given to an upgrade callback.
///
/// Exposes the versions of the upgrade, the structural primitives of the
/// in-flight upgrade transaction and a [`Transaction`] over every store for
/// data migration. All of it commits or rolls back together with the upgrade.
pub struct UpgradeDb {
    upgrade: Arc<dyn UpgradeTransaction>,
    transaction: Transaction,
    applied_versions: Vec<u32>,
}

impl UpgradeDb {
    pub(crate) fn new(
        upgrade: Arc<dyn UpgradeTransaction>,
        applied_versions: Vec<u32>,
        quota_relay: Option<QuotaRelay>,
    ) -> BackboardResult<Self> {
        let transaction = Transaction::new(upgrade.as_transaction()?, quota_relay);
        Ok(UpgradeDb {
            upgrade,
            transaction,
            applied_versions,
        })
    }

    /// Version of the database before the upgrade, 0 when it is being created.
    pub fn old_version(&self) -> u32 {
        self.upgrade.old_version()
    }

    pub fn new_version(&self) -> u32 {
        self.upgrade.new_version()
    }

    /// Snapshot versions applied before the callback, ascending.
    pub fn applied_versions(&self) -> &[u32] {
        &self.applied_versions
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.upgrade.schema().store_names().into_iter().sorted().collect()
    }

    /// Structure as it stands inside the upgrade transaction.
    pub fn schema(&self) -> LiveSchemaState {
        self.upgrade.schema()
    }

    pub fn create_object_store(&self, name: &str, options: StoreOptions) -> BackboardResult<UpgradeStore> {
        self.upgrade.create_object_store(name, &options)?;
        Ok(self.store_handle(name))
    }

    pub fn delete_object_store(&self, name: &str) -> BackboardResult<()> {
        self.upgrade.delete_object_store(name)
    }

    /// Structural handle on an existing store.
    pub fn object_store(&self, name: &str) -> BackboardResult<UpgradeStore> {
        if !self.upgrade.schema().has_store(name) {
            return Err(BackboardError::new(
                &format!("Object store '{}' not found", name),
                ErrorKind::NotFoundError,
            ));
        }
        Ok(self.store_handle(name))
    }

    /// Data access over every store of the upgrade transaction.
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    fn store_handle(&self, name: &str) -> UpgradeStore {
        UpgradeStore {
            name: name.to_string(),
            upgrade: self.upgrade.clone(),
        }
    }
}

/// Structural handle on one store during an upgrade.
pub struct UpgradeStore {
    name: String,
    upgrade: Arc<dyn UpgradeTransaction>,
}

impl UpgradeStore {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index_names(&self) -> BackboardResult<Vec<String>> {
        self.upgrade.index_names(&self.name)
    }

    pub fn create_index(&self, name: &str, definition: IndexDefinition) -> BackboardResult<()> {
        self.upgrade.create_index(&self.name, name, &definition)
    }

    pub fn delete_index(&self, name: &str) -> BackboardResult<()> {
        self.upgrade.delete_index(&self.name, name)
    }
}
