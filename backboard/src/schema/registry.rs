use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use crate::schema::{SchemaSnapshot, StoreDefinition};
use std::collections::HashSet;

/// Ordered, validated list of schema snapshots.
///
/// Versions are strictly ascending and start at 1; the last snapshot is the
/// target schema of every open. A registry never changes once built.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    snapshots: Vec<SchemaSnapshot>,
}

impl SchemaRegistry {
    /// Validates `snapshots` and builds the registry.
    ///
    /// Fails with `ConfigurationError` when the list is empty, when versions are
    /// zero or not strictly ascending, when a store or index name is empty or
    /// repeated, or when a store or index combines options the engine rejects.
    pub fn new(snapshots: Vec<SchemaSnapshot>) -> BackboardResult<Self> {
        if snapshots.is_empty() {
            return Err(configuration_error("At least one schema snapshot is required"));
        }

        let mut previous = 0;
        for snapshot in &snapshots {
            if snapshot.version() == 0 {
                return Err(configuration_error("Schema snapshot version must be a positive integer"));
            }
            if snapshot.version() <= previous {
                return Err(configuration_error(&format!(
                    "Schema snapshot versions must be strictly ascending, found {} after {}",
                    snapshot.version(),
                    previous
                )));
            }
            validate_snapshot(snapshot)?;
            previous = snapshot.version();
        }

        log::debug!(
            "Schema registry built with {} snapshot(s), target version {}",
            snapshots.len(),
            previous
        );
        Ok(SchemaRegistry { snapshots })
    }

    /// Version of the last snapshot.
    pub fn target_version(&self) -> u32 {
        self.target().version()
    }

    /// The last snapshot, which the live schema ends up matching.
    pub fn target(&self) -> &SchemaSnapshot {
        // construction guarantees at least one snapshot
        &self.snapshots[self.snapshots.len() - 1]
    }

    /// Snapshots with `current < version <= target`, in ascending order.
    pub fn pending(&self, current: u32, target: u32) -> impl Iterator<Item = &SchemaSnapshot> {
        self.snapshots
            .iter()
            .filter(move |s| s.version() > current && s.version() <= target)
    }

    pub fn snapshots(&self) -> &[SchemaSnapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl TryFrom<Vec<SchemaSnapshot>> for SchemaRegistry {
    type Error = BackboardError;

    fn try_from(snapshots: Vec<SchemaSnapshot>) -> Result<Self, Self::Error> {
        SchemaRegistry::new(snapshots)
    }
}

fn validate_snapshot(snapshot: &SchemaSnapshot) -> BackboardResult<()> {
    let mut store_names = HashSet::new();
    for (name, store) in snapshot.stores() {
        if name.is_empty() {
            return Err(configuration_error(&format!(
                "Empty object store name in schema version {}",
                snapshot.version()
            )));
        }
        if !store_names.insert(name) {
            return Err(configuration_error(&format!(
                "Object store '{}' declared twice in schema version {}",
                name,
                snapshot.version()
            )));
        }
        validate_store(snapshot.version(), name, store)?;
    }
    Ok(())
}

fn validate_store(version: u32, name: &str, store: &StoreDefinition) -> BackboardResult<()> {
    let options = store.options();
    if let Some(key_path) = options.key_path() {
        if !key_path.is_valid() {
            return Err(configuration_error(&format!(
                "Invalid key path {} for object store '{}' in schema version {}",
                key_path, name, version
            )));
        }
        if options.auto_increment() && (key_path.is_empty_path() || key_path.is_compound()) {
            return Err(configuration_error(&format!(
                "Object store '{}' cannot combine autoIncrement with key path {}",
                name, key_path
            )));
        }
    }

    let mut index_names = HashSet::new();
    for (index_name, index) in store.indexes() {
        if index_name.is_empty() {
            return Err(configuration_error(&format!(
                "Empty index name on object store '{}' in schema version {}",
                name, version
            )));
        }
        if !index_names.insert(index_name) {
            return Err(configuration_error(&format!(
                "Index '{}' declared twice on object store '{}' in schema version {}",
                index_name, name, version
            )));
        }
        if !index.key_path().is_valid() {
            return Err(configuration_error(&format!(
                "Invalid key path {} for index '{}' on object store '{}'",
                index.key_path(),
                index_name,
                name
            )));
        }
        if index.is_multi_entry() && index.key_path().is_compound() {
            return Err(configuration_error(&format!(
                "Index '{}' on object store '{}' cannot be multiEntry with a compound key path",
                index_name, name
            )));
        }
    }
    Ok(())
}

fn configuration_error(message: &str) -> BackboardError {
    log::error!("{}", message);
    BackboardError::new(message, ErrorKind::ConfigurationError)
}
