//! Writes against a bound object store.

use crate::engine::{Cursor, ObjectStore};
use crate::error::{Result, StoreError};
use crate::key::{extract_key, Direction, Key, KeyRange, Record};

/// Records must be JSON objects.
pub fn ensure_object(record: &Record) -> Result<()> {
    if record.is_object() {
        Ok(())
    } else {
        Err(StoreError::TypeMismatch(json_kind(record).to_string()))
    }
}

fn json_kind(value: &Record) -> &'static str {
    match value {
        Record::Null => "null",
        Record::Bool(_) => "a boolean",
        Record::Number(_) => "a number",
        Record::String(_) => "a string",
        Record::Array(_) => "an array",
        Record::Object(_) => "an object",
    }
}

/// Add a record. An existing record under the same key is never overwritten.
pub async fn insert<S: ObjectStore>(store: &S, record: &Record) -> Result<Key> {
    ensure_object(record)?;
    store.add(record).await
}

pub async fn delete_by_key<S: ObjectStore>(store: &S, key: &Key) -> Result<()> {
    store.delete(key).await
}

pub async fn clear<S: ObjectStore>(store: &S) -> Result<()> {
    store.clear().await
}

pub async fn count<S: ObjectStore>(store: &S) -> Result<u64> {
    store.count().await
}

/// Replace the first record equal to `old` with `new`, scanning in key order.
///
/// Returns the primary key of the replaced record, or `None` when nothing matched.
pub async fn update_by_match<S: ObjectStore>(
    store: &S,
    old: &Record,
    new: &Record,
) -> Result<Option<Key>> {
    ensure_object(old)?;
    ensure_object(new)?;

    let mut cursor = store.open_cursor(None, Direction::Next).await?;
    while let Some(current) = cursor {
        if current.value() == old {
            current.update(new).await?;
            return Ok(Some(current.primary_key().clone()));
        }
        cursor = current.advance().await?;
    }
    Ok(None)
}

/// Replace the record stored under the key found in `new` at `key_path`.
pub async fn update_by_key<S: ObjectStore>(
    store: &S,
    key_path: Option<&str>,
    new: &Record,
) -> Result<Key> {
    ensure_object(new)?;
    let path = key_path.ok_or_else(|| {
        StoreError::InvalidKey("update by key needs a store with in-line keys".into())
    })?;
    let key = extract_key(new, path)
        .ok_or_else(|| StoreError::InvalidKey(format!("record has no key at '{}'", path)))?;

    let range = KeyRange::only(key.clone());
    match store.open_cursor(Some(&range), Direction::Next).await? {
        Some(cursor) => {
            cursor.update(new).await?;
            Ok(key)
        }
        None => Err(StoreError::NotFound(format!("no record with key {}", key))),
    }
}
