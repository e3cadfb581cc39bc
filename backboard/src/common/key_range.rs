use crate::common::Key;
use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use std::fmt::{Display, Formatter};

/// A continuous interval over keys, used to select records from an object store
/// or an index.
///
/// ```rust,ignore
/// use backboard::common::KeyRange;
///
/// let seniors = KeyRange::lower_bound(65, false);
/// let teens = KeyRange::bound(13, 19, false, false)?;
/// let exactly_four = KeyRange::only(4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// A range containing exactly one key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        KeyRange {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    /// All keys above `lower` (excluding it if `open`).
    pub fn lower_bound(lower: impl Into<Key>, open: bool) -> Self {
        KeyRange {
            lower: Some(lower.into()),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    /// All keys below `upper` (excluding it if `open`).
    pub fn upper_bound(upper: impl Into<Key>, open: bool) -> Self {
        KeyRange {
            lower: None,
            upper: Some(upper.into()),
            lower_open: false,
            upper_open: open,
        }
    }

    /// All keys between `lower` and `upper`.
    ///
    /// Fails with `DataError` when `lower > upper`, or when both bounds are equal
    /// and either end is open.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> BackboardResult<Self> {
        let lower = lower.into();
        let upper = upper.into();
        if lower > upper || (lower == upper && (lower_open || upper_open)) {
            log::error!("Invalid key range: lower {} upper {}", lower, upper);
            return Err(BackboardError::new(
                &format!("Invalid key range: lower bound {} is not below upper bound {}", lower, upper),
                ErrorKind::DataError,
            ));
        }
        Ok(KeyRange {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    /// The unbounded range.
    pub(crate) fn unbounded() -> Self {
        KeyRange {
            lower: None,
            upper: None,
            lower_open: false,
            upper_open: false,
        }
    }

    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    pub fn lower_open(&self) -> bool {
        self.lower_open
    }

    pub fn upper_open(&self) -> bool {
        self.upper_open
    }

    /// Returns true if `key` lies within the range.
    pub fn includes(&self, key: &Key) -> bool {
        let above_lower = match &self.lower {
            Some(lower) if self.lower_open => key > lower,
            Some(lower) => key >= lower,
            None => true,
        };
        let below_upper = match &self.upper {
            Some(upper) if self.upper_open => key < upper,
            Some(upper) => key <= upper,
            None => true,
        };
        above_lower && below_upper
    }

    /// The single key of an `only` range, if the range is one.
    pub(crate) fn single_key(&self) -> Option<&Key> {
        match (&self.lower, &self.upper) {
            (Some(lower), Some(upper)) if lower == upper => Some(lower),
            _ => None,
        }
    }
}

impl From<Key> for KeyRange {
    fn from(key: Key) -> Self {
        KeyRange::only(key)
    }
}

// a bare key queries exactly that key
macro_rules! range_from_key {
    ($($t:ty),*) => {
        $(impl From<$t> for KeyRange {
            fn from(value: $t) -> Self {
                KeyRange::only(value)
            }
        })*
    };
}

range_from_key!(i32, i64, u32, u64, usize, f64, &str, String);

impl Display for KeyRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let open = if self.lower_open { "(" } else { "[" };
        let close = if self.upper_open { ")" } else { "]" };
        let lower = self.lower.as_ref().map(|k| k.to_string()).unwrap_or_else(|| "-inf".to_string());
        let upper = self.upper.as_ref().map(|k| k.to_string()).unwrap_or_else(|| "+inf".to_string());
        write!(f, "{}{}, {}{}", open, lower, upper, close)
    }
}
