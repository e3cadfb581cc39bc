use crate::schema::{IndexDefinition, SchemaOperation, StoreOptions};
use indexmap::IndexMap;

/// Structure of an existing database as reported by the engine: its object
/// stores with their options and indexes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSchemaState {
    stores: IndexMap<String, LiveStore>,
}

/// One object store of a [`LiveSchemaState`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveStore {
    options: StoreOptions,
    indexes: IndexMap<String, IndexDefinition>,
}

impl LiveStore {
    pub fn new(options: StoreOptions) -> Self {
        LiveStore {
            options,
            indexes: IndexMap::new(),
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.get(name)
    }

    pub fn indexes(&self) -> impl Iterator<Item = (&str, &IndexDefinition)> {
        self.indexes.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }
}

impl LiveSchemaState {
    pub fn new() -> Self {
        LiveSchemaState::default()
    }

    pub fn insert_store(&mut self, name: &str, options: StoreOptions) {
        self.stores.insert(name.to_string(), LiveStore::new(options));
    }

    /// Adds an index to an existing store; ignored if the store is unknown.
    pub fn insert_index(&mut self, store: &str, name: &str, definition: IndexDefinition) {
        if let Some(live) = self.stores.get_mut(store) {
            live.indexes.insert(name.to_string(), definition);
        }
    }

    pub fn has_store(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    pub fn store(&self, name: &str) -> Option<&LiveStore> {
        self.stores.get(name)
    }

    pub fn stores(&self) -> impl Iterator<Item = (&str, &LiveStore)> {
        self.stores.iter().map(|(name, store)| (name.as_str(), store))
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Applies a structural operation to this view, mirroring what the engine
    /// does when the same operation is issued against it.
    pub fn apply(&mut self, operation: &SchemaOperation) {
        match operation {
            SchemaOperation::CreateStore { name, options } => {
                self.insert_store(name, options.clone());
            }
            SchemaOperation::DeleteStore { name } => {
                self.stores.shift_remove(name);
            }
            SchemaOperation::CreateIndex {
                store,
                name,
                definition,
            } => {
                self.insert_index(store, name, definition.clone());
            }
            SchemaOperation::DeleteIndex { store, name } => {
                if let Some(live) = self.stores.get_mut(store) {
                    live.indexes.shift_remove(name);
                }
            }
        }
    }
}
