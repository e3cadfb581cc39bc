use crate::schema::{IndexDefinition, LiveSchemaState, SchemaSnapshot, StoreDefinition, StoreOptions};
use indexmap::IndexMap;
use std::fmt::{Display, Formatter};

/// A single structural change against the live schema.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOperation {
    CreateStore {
        name: String,
        options: StoreOptions,
    },
    DeleteStore {
        name: String,
    },
    CreateIndex {
        store: String,
        name: String,
        definition: IndexDefinition,
    },
    DeleteIndex {
        store: String,
        name: String,
    },
}

impl Display for SchemaOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaOperation::CreateStore { name, .. } => write!(f, "create object store '{}'", name),
            SchemaOperation::DeleteStore { name } => write!(f, "delete object store '{}'", name),
            SchemaOperation::CreateIndex { store, name, .. } => {
                write!(f, "create index '{}' on '{}'", name, store)
            }
            SchemaOperation::DeleteIndex { store, name } => {
                write!(f, "delete index '{}' on '{}'", name, store)
            }
        }
    }
}

/// Index changes of one store present both live and in the snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexChanges {
    indexes_to_create: Vec<(String, IndexDefinition)>,
    indexes_to_delete: Vec<String>,
}

impl IndexChanges {
    pub fn indexes_to_create(&self) -> &[(String, IndexDefinition)] {
        &self.indexes_to_create
    }

    pub fn indexes_to_delete(&self) -> &[String] {
        &self.indexes_to_delete
    }

    pub fn is_empty(&self) -> bool {
        self.indexes_to_create.is_empty() && self.indexes_to_delete.is_empty()
    }
}

/// Difference between a live schema and a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffResult {
    stores_to_create: Vec<(String, StoreDefinition)>,
    stores_to_delete: Vec<String>,
    store_changes: IndexMap<String, IndexChanges>,
}

impl DiffResult {
    pub fn stores_to_create(&self) -> &[(String, StoreDefinition)] {
        &self.stores_to_create
    }

    pub fn stores_to_delete(&self) -> &[String] {
        &self.stores_to_delete
    }

    /// Index changes per surviving store; stores without changes are absent.
    pub fn store_changes(&self) -> &IndexMap<String, IndexChanges> {
        &self.store_changes
    }

    pub fn is_empty(&self) -> bool {
        self.stores_to_create.is_empty()
            && self.stores_to_delete.is_empty()
            && self.store_changes.is_empty()
    }

    /// Flattens the diff into the order it is applied in: store deletions, then
    /// store creations with their indexes, then per surviving store its index
    /// deletions followed by its index creations.
    pub fn operations(&self) -> Vec<SchemaOperation> {
        let mut operations = Vec::new();

        for name in &self.stores_to_delete {
            operations.push(SchemaOperation::DeleteStore { name: name.clone() });
        }

        for (name, definition) in &self.stores_to_create {
            operations.push(SchemaOperation::CreateStore {
                name: name.clone(),
                options: definition.options().clone(),
            });
            for (index_name, index) in definition.indexes() {
                operations.push(SchemaOperation::CreateIndex {
                    store: name.clone(),
                    name: index_name.to_string(),
                    definition: index.clone(),
                });
            }
        }

        for (store, changes) in &self.store_changes {
            for name in &changes.indexes_to_delete {
                operations.push(SchemaOperation::DeleteIndex {
                    store: store.clone(),
                    name: name.clone(),
                });
            }
            for (name, definition) in &changes.indexes_to_create {
                operations.push(SchemaOperation::CreateIndex {
                    store: store.clone(),
                    name: name.clone(),
                    definition: definition.clone(),
                });
            }
        }

        operations
    }
}

/// Computes the changes that turn `live` into the structure described by
/// `snapshot`.
///
/// Stores and indexes are matched by name. An index whose definition differs is
/// deleted and recreated. Store options cannot be changed in place; a mismatch is
/// logged and left alone.
pub fn diff(live: &LiveSchemaState, snapshot: &SchemaSnapshot) -> DiffResult {
    let mut result = DiffResult::default();

    for (name, _) in live.stores() {
        if snapshot.get_store(name).is_none() {
            result.stores_to_delete.push(name.to_string());
        }
    }

    for (name, definition) in snapshot.stores() {
        let live_store = match live.store(name) {
            Some(store) => store,
            None => {
                result.stores_to_create.push((name.to_string(), definition.clone()));
                continue;
            }
        };

        if live_store.options() != definition.options() {
            log::warn!(
                "Object store '{}' options differ from schema version {} and cannot be changed in place",
                name,
                snapshot.version()
            );
        }

        let mut changes = IndexChanges::default();
        for (index_name, live_index) in live_store.indexes() {
            match definition.get_index(index_name) {
                Some(wanted) if wanted == live_index => {}
                _ => changes.indexes_to_delete.push(index_name.to_string()),
            }
        }
        for (index_name, wanted) in definition.indexes() {
            match live_store.index(index_name) {
                Some(live_index) if live_index == wanted => {}
                _ => changes.indexes_to_create.push((index_name.to_string(), wanted.clone())),
            }
        }

        if !changes.is_empty() {
            result.store_changes.insert(name.to_string(), changes);
        }
    }

    result
}
