use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use itertools::Itertools;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// A primary or index key.
///
/// Keys order by type first (`Number < String < Array`) and then by value; arrays
/// compare element-wise with the shorter array first on a common prefix.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    String(String),
    Array(Vec<Key>),
}

impl Key {
    /// Converts a record value into a key, returning `None` if the value is not a
    /// valid key (objects, booleans, null, NaN or arrays containing any of those).
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_f64().filter(|f| !f.is_nan()).map(Key::Number),
            Value::String(s) => Some(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    /// Converts the key back into a record value. Integral numbers are emitted as
    /// JSON integers.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    Value::Number(Number::from(*n as i64))
                } else {
                    Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)
                }
            }
            Key::String(s) => Value::String(s.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::String(_) => 1,
            Key::Array(_) => 2,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // -0.0 and 0.0 are the same key
            (Key::Number(a), Key::Number(b)) if a == b => Ordering::Equal,
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::String(s) => write!(f, "\"{}\"", s),
            Key::Array(items) => write!(f, "[{}]", items.iter().join(", ")),
        }
    }
}

macro_rules! key_from_number {
    ($($t:ty),*) => {
        $(impl From<$t> for Key {
            fn from(value: $t) -> Self {
                Key::Number(value as f64)
            }
        })*
    };
}

key_from_number!(i32, i64, u32, u64, usize, f64);

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::String(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::String(value)
    }
}

impl From<Vec<Key>> for Key {
    fn from(value: Vec<Key>) -> Self {
        Key::Array(value)
    }
}

/// Path used to extract a key from a record.
///
/// A `Single` path is a dot-separated list of identifiers, the empty string
/// designating the record itself. A `Compound` path extracts an array key made of
/// one component per member path.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(untagged))]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    pub fn is_compound(&self) -> bool {
        matches!(self, KeyPath::Compound(_))
    }

    /// True for the empty-string path, which designates the whole record.
    pub fn is_empty_path(&self) -> bool {
        matches!(self, KeyPath::Single(path) if path.is_empty())
    }

    pub fn is_valid(&self) -> bool {
        match self {
            KeyPath::Single(path) => is_valid_path(path),
            KeyPath::Compound(paths) => {
                !paths.is_empty() && paths.iter().all(|p| !p.is_empty() && is_valid_path(p))
            }
        }
    }

    /// Extracts a key from `value`, `None` if the path does not resolve to a valid key.
    pub fn extract(&self, value: &Value) -> Option<Key> {
        match self {
            KeyPath::Single(path) => resolve(value, path).and_then(Key::from_value),
            KeyPath::Compound(paths) => paths
                .iter()
                .map(|p| resolve(value, p).and_then(Key::from_value))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Extracts the raw value at the path, used by multi-entry indexes which
    /// index every element of an array separately.
    pub(crate) fn extract_raw<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match self {
            KeyPath::Single(path) => resolve(value, path),
            KeyPath::Compound(_) => None,
        }
    }

    /// Writes a generated key into `value` at the path, creating intermediate objects.
    pub fn inject(&self, value: &mut Value, key: &Key) -> BackboardResult<()> {
        let path = match self {
            KeyPath::Single(path) if !path.is_empty() => path,
            _ => {
                return Err(BackboardError::new(
                    &format!("Cannot inject a key at key path {}", self),
                    ErrorKind::DataError,
                ))
            }
        };

        let segments: Vec<&str> = path.split('.').collect();
        let mut current = value;
        for (position, segment) in segments.iter().enumerate() {
            let object = current.as_object_mut().ok_or_else(|| {
                BackboardError::new(
                    &format!("Cannot inject key at '{}': value is not an object", path),
                    ErrorKind::DataError,
                )
            })?;

            if position == segments.len() - 1 {
                object.insert(segment.to_string(), key.to_value());
                return Ok(());
            }
            current = object
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        Ok(())
    }
}

fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| current.get(segment))
}

fn is_valid_path(path: &str) -> bool {
    if path.is_empty() {
        return true;
    }
    path.split('.').all(|segment| {
        let mut chars = segment.chars();
        match chars.next() {
            Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {
                chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
            }
            _ => false,
        }
    })
}

impl Display for KeyPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyPath::Single(path) => write!(f, "'{}'", path),
            KeyPath::Compound(paths) => {
                write!(f, "[{}]", paths.iter().map(|p| format!("'{}'", p)).join(", "))
            }
        }
    }
}

impl From<&str> for KeyPath {
    fn from(value: &str) -> Self {
        KeyPath::Single(value.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(value: String) -> Self {
        KeyPath::Single(value)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(value: Vec<&str>) -> Self {
        KeyPath::Compound(value.into_iter().map(String::from).collect())
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(value: Vec<String>) -> Self {
        KeyPath::Compound(value)
    }
}
