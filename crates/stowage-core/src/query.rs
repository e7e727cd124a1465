//! Cursor-driven reads: full scans, key ranges, substring search and point
//! lookups over a bound object store.

use serde_json::Value;

use crate::engine::{Cursor, ObjectStore};
use crate::error::{Result, StoreError};
use crate::key::{Direction, Key, KeyRange, Record};

/// Key-path range query as supplied by callers.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub lower: Value,
    pub upper: Value,
    pub exclude_lower: bool,
    pub exclude_upper: bool,
}

impl RangeQuery {
    pub fn new(lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        Self {
            lower: lower.into(),
            upper: upper.into(),
            exclude_lower: false,
            exclude_upper: false,
        }
    }

    pub fn exclusive(mut self, exclude_lower: bool, exclude_upper: bool) -> Self {
        self.exclude_lower = exclude_lower;
        self.exclude_upper = exclude_upper;
        self
    }

    /// Validate the bounds and build the engine key range.
    pub fn key_range(&self) -> Result<KeyRange> {
        let lower = range_bound("lower", &self.lower)?;
        let upper = range_bound("upper", &self.upper)?;
        KeyRange::bound(lower, upper, self.exclude_lower, self.exclude_upper)
    }
}

fn range_bound(which: &str, value: &Value) -> Result<Key> {
    match value {
        Value::Null => Err(StoreError::RangeParameter(format!("{} bound missing", which))),
        Value::String(s) if s.is_empty() => {
            Err(StoreError::RangeParameter(format!("{} bound is empty", which)))
        }
        other => Key::from_value(other).ok_or_else(|| {
            StoreError::RangeParameter(format!("{} bound {} is not a valid key", which, other))
        }),
    }
}

/// Case-sensitive search over one top-level field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstringSearch {
    field: String,
    keyword: String,
}

impl SubstringSearch {
    pub fn new(field: &str, keyword: &str) -> Result<Self> {
        if field.is_empty() {
            return Err(StoreError::SearchParameter("search field is empty".into()));
        }
        if keyword.is_empty() {
            return Err(StoreError::SearchParameter("search keyword is empty".into()));
        }
        Ok(Self {
            field: field.to_string(),
            keyword: keyword.to_string(),
        })
    }

    /// A string field matches when it contains the keyword; an array field
    /// matches when one of its elements equals the keyword.
    pub fn matches(&self, record: &Record) -> bool {
        match record.get(&self.field) {
            Some(Value::String(s)) => s.contains(&self.keyword),
            Some(Value::Array(items)) => items
                .iter()
                .any(|item| item.as_str() == Some(self.keyword.as_str())),
            _ => false,
        }
    }
}

/// Visit every record in `range` in `direction` order, keeping those accepted by `keep`.
pub async fn collect<S, F>(
    store: &S,
    range: Option<&KeyRange>,
    direction: Direction,
    mut keep: F,
) -> Result<Vec<Record>>
where
    S: ObjectStore,
    F: FnMut(&Record) -> bool,
{
    let mut records = Vec::new();
    let mut cursor = store.open_cursor(range, direction).await?;
    while let Some(current) = cursor {
        if keep(current.value()) {
            records.push(current.value().clone());
        }
        cursor = current.advance().await?;
    }
    Ok(records)
}

pub async fn scan_all<S: ObjectStore>(store: &S, direction: Direction) -> Result<Vec<Record>> {
    collect(store, None, direction, |_| true).await
}

/// Records inside `range`, ascending by key.
pub async fn scan_range<S: ObjectStore>(store: &S, range: &KeyRange) -> Result<Vec<Record>> {
    collect(store, Some(range), Direction::Next, |_| true).await
}

pub async fn search<S: ObjectStore>(store: &S, search: &SubstringSearch) -> Result<Vec<Record>> {
    collect(store, None, Direction::Next, |record| search.matches(record)).await
}

pub async fn lookup_by_index<S: ObjectStore>(
    store: &S,
    index: &str,
    value: &Key,
) -> Result<Option<Record>> {
    store.get_by_index(index, value).await
}

pub async fn lookup_by_key<S: ObjectStore>(store: &S, key: &Key) -> Result<Option<Record>> {
    let range = KeyRange::only(key.clone());
    let cursor = store.open_cursor(Some(&range), Direction::Next).await?;
    Ok(cursor.map(|c| c.value().clone()))
}

/// First record visited in `direction`, if any.
pub async fn first_visited<S: ObjectStore>(
    store: &S,
    direction: Direction,
) -> Result<Option<Record>> {
    let cursor = store.open_cursor(None, direction).await?;
    Ok(cursor.map(|c| c.value().clone()))
}
