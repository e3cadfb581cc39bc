use crate::common::KeyPath;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Options of an object store: where its primary key comes from.
///
/// With a key path the key is read from the record (in-line keys); without one
/// the key is supplied next to the record (out-of-line keys). With
/// `auto_increment` the engine generates missing keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "camelCase"))]
pub struct StoreOptions {
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    key_path: Option<KeyPath>,
    #[cfg_attr(feature = "serde", serde(default))]
    auto_increment: bool,
}

impl StoreOptions {
    pub fn new(key_path: Option<KeyPath>, auto_increment: bool) -> Self {
        StoreOptions {
            key_path,
            auto_increment,
        }
    }

    pub fn key_path(&self) -> Option<&KeyPath> {
        self.key_path.as_ref()
    }

    pub fn auto_increment(&self) -> bool {
        self.auto_increment
    }
}

/// Definition of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "camelCase"))]
pub struct IndexDefinition {
    key_path: KeyPath,
    #[cfg_attr(feature = "serde", serde(default))]
    unique: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    multi_entry: bool,
}

impl IndexDefinition {
    pub fn new(key_path: impl Into<KeyPath>) -> Self {
        IndexDefinition {
            key_path: key_path.into(),
            unique: false,
            multi_entry: false,
        }
    }

    /// Marks the index unique: no two records may share an index key.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the index multi-entry: an array key path value indexes every element.
    pub fn multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }

    pub fn key_path(&self) -> &KeyPath {
        &self.key_path
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_multi_entry(&self) -> bool {
        self.multi_entry
    }
}

/// Desired structure of one object store within a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StoreDefinition {
    #[cfg_attr(feature = "serde", serde(default))]
    options: StoreOptions,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Vec::is_empty", with = "ordered_entries")
    )]
    indexes: Vec<(String, IndexDefinition)>,
}

impl StoreDefinition {
    /// A store with out-of-line keys and no indexes.
    pub fn new() -> Self {
        StoreDefinition::default()
    }

    pub fn key_path(mut self, key_path: impl Into<KeyPath>) -> Self {
        self.options.key_path = Some(key_path.into());
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.options.auto_increment = true;
        self
    }

    /// Declares an index. Declaration order is preserved.
    pub fn index(mut self, name: &str, definition: IndexDefinition) -> Self {
        self.indexes.push((name.to_string(), definition));
        self
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn indexes(&self) -> impl Iterator<Item = (&str, &IndexDefinition)> {
        self.indexes.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn get_index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|(n, _)| n == name).map(|(_, def)| def)
    }
}

/// A complete versioned description of the desired store and index structure.
///
/// ```rust,ignore
/// let v1 = SchemaSnapshot::new(1).store(
///     "players",
///     StoreDefinition::new()
///         .key_path("pid")
///         .auto_increment()
///         .index("tid", IndexDefinition::new("tid")),
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SchemaSnapshot {
    version: u32,
    #[cfg_attr(
        feature = "serde",
        serde(rename = "objectStores", default, with = "ordered_entries")
    )]
    stores: Vec<(String, StoreDefinition)>,
}

impl SchemaSnapshot {
    pub fn new(version: u32) -> Self {
        SchemaSnapshot {
            version,
            stores: Vec::new(),
        }
    }

    /// Declares an object store. Declaration order is preserved.
    pub fn store(mut self, name: &str, definition: StoreDefinition) -> Self {
        self.stores.push((name.to_string(), definition));
        self
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn stores(&self) -> impl Iterator<Item = (&str, &StoreDefinition)> {
        self.stores.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn get_store(&self, name: &str) -> Option<&StoreDefinition> {
        self.stores.iter().find(|(n, _)| n == name).map(|(_, def)| def)
    }

    pub fn store_names(&self) -> Vec<&str> {
        self.stores.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// (De)serializes a JSON object as an ordered list of named entries, keeping
/// declaration order and any repeated name for validation.
#[cfg(feature = "serde")]
mod ordered_entries {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt::Formatter;
    use std::marker::PhantomData;

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S, T>(entries: &Vec<(String, T)>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (name, value) in entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
            type Value = Vec<(String, T)>;

            fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
                formatter.write_str("a map of named definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, T>()? {
                    entries.push(entry);
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}
