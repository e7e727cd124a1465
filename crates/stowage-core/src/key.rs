//! Keys, key ranges, cursor directions and key-path evaluation.
//!
//! Key ordering follows the object-store model: every number sorts before every
//! string, every string before every array. Arrays compare element by element,
//! then by length.

use std::cmp::Ordering;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// JSON record as stored in an object store.
pub type Record = Value;

/// A valid object-store key.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    String(String),
    Array(Vec<Key>),
}

impl Key {
    /// Convert a JSON value into a key.
    ///
    /// Returns `None` for null, booleans, objects, non-finite numbers and arrays
    /// containing any of those.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => {
                let n = n.as_f64()?;
                if n.is_nan() {
                    return None;
                }
                // -0.0 and 0.0 are the same key
                Some(Key::Number(if n == 0.0 { 0.0 } else { n }))
            }
            Value::String(s) => Some(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            Value::Null | Value::Bool(_) | Value::Object(_) => None,
        }
    }

    /// Like [`Key::from_value`], failing with `InvalidKey`.
    pub fn try_from_value(value: &Value) -> Result<Key> {
        Key::from_value(value).ok_or_else(|| StoreError::InvalidKey(value.to_string()))
    }

    /// Convert back into JSON. Whole numbers come back as integers.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            Key::String(s) => Value::String(s.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
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

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.cmp(y) {
                        Ordering::Equal => continue,
                        unequal => return unequal,
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// One end of a [`KeyRange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBound {
    pub key: Key,
    pub open: bool,
}

/// Lower/upper bound pair restricting cursor traversal. Missing ends are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: Option<KeyBound>,
    pub upper: Option<KeyBound>,
}

impl KeyRange {
    /// Range matching exactly one key.
    pub fn only(key: Key) -> Self {
        Self {
            lower: Some(KeyBound {
                key: key.clone(),
                open: false,
            }),
            upper: Some(KeyBound { key, open: false }),
        }
    }

    /// Bounded range. Fails when `lower > upper`, or when they are equal and either
    /// end is open.
    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> Result<Self> {
        match lower.cmp(&upper) {
            Ordering::Greater => {
                return Err(StoreError::RangeParameter(format!(
                    "lower bound {} is greater than upper bound {}",
                    lower, upper
                )))
            }
            Ordering::Equal if lower_open || upper_open => {
                return Err(StoreError::RangeParameter(format!(
                    "empty range: {} with an open end",
                    lower
                )))
            }
            _ => {}
        }
        Ok(Self {
            lower: Some(KeyBound {
                key: lower,
                open: lower_open,
            }),
            upper: Some(KeyBound {
                key: upper,
                open: upper_open,
            }),
        })
    }

    pub fn lower_bound(key: Key, open: bool) -> Self {
        Self {
            lower: Some(KeyBound { key, open }),
            upper: None,
        }
    }
}

/// Cursor traversal direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Ascending
    #[default]
    Next,
    /// Ascending, skipping duplicate keys
    NextUnique,
    /// Descending
    Prev,
    /// Descending, skipping duplicate keys
    PrevUnique,
}

impl Direction {
    /// Parse a direction token. Unrecognized tokens fall back to [`Direction::Next`].
    pub fn from_token(token: &str) -> Self {
        match token {
            "next" => Direction::Next,
            "nextunique" => Direction::NextUnique,
            "prev" => Direction::Prev,
            "prevunique" => Direction::PrevUnique,
            _ => Direction::Next,
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            Direction::Next => "next",
            Direction::NextUnique => "nextunique",
            Direction::Prev => "prev",
            Direction::PrevUnique => "prevunique",
        }
    }

    pub fn is_reverse(&self) -> bool {
        matches!(self, Direction::Prev | Direction::PrevUnique)
    }
}

impl From<&str> for Direction {
    fn from(token: &str) -> Self {
        Direction::from_token(token)
    }
}

/// Resolve a (possibly dotted) key path against a record.
pub fn evaluate_key_path<'a>(record: &'a Value, key_path: &str) -> Option<&'a Value> {
    if key_path.is_empty() {
        return Some(record);
    }
    key_path
        .split('.')
        .try_fold(record, |value, segment| value.as_object()?.get(segment))
}

/// Extract the key at `key_path`, if present and valid.
pub fn extract_key(record: &Value, key_path: &str) -> Option<Key> {
    evaluate_key_path(record, key_path).and_then(Key::from_value)
}

/// Write a generated key into a record at `key_path`, creating intermediate
/// objects as needed.
pub fn inject_key(record: &mut Value, key_path: &str, key: &Key) -> Result<()> {
    let mut segments = key_path.split('.').peekable();
    let mut current = record;
    while let Some(segment) = segments.next() {
        let object = current.as_object_mut().ok_or_else(|| {
            StoreError::InvalidKey(format!("cannot write key path '{}'", key_path))
        })?;
        if segments.peek().is_none() {
            object.insert(segment.to_string(), key.to_value());
            return Ok(());
        }
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Ok(())
}
