//! Conversions between stowage keys/records and JavaScript values.

use js_sys::Array;
use serde::Serialize;
use stowage_core::{Direction, Key, KeyRange, Record};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{IdbCursorDirection, IdbKeyRange};

use crate::error::{IndexedDbError, Result};

pub fn key_to_js(key: &Key) -> JsValue {
    match key {
        Key::Number(n) => JsValue::from_f64(*n),
        Key::String(s) => JsValue::from_str(s),
        Key::Array(items) => items.iter().map(key_to_js).collect::<Array>().into(),
    }
}

pub fn key_from_js(value: &JsValue) -> Result<Key> {
    if let Some(n) = value.as_f64() {
        return Ok(Key::Number(n));
    }
    if let Some(s) = value.as_string() {
        return Ok(Key::String(s));
    }
    if Array::is_array(value) {
        let array: &Array = value.unchecked_ref();
        return array
            .iter()
            .map(|item| key_from_js(&item))
            .collect::<Result<Vec<_>>>()
            .map(Key::Array);
    }
    Err(IndexedDbError::JsValue(format!(
        "unsupported key type: {:?}",
        value
    )))
}

/// Serialize a record into a plain JS object (maps become objects, not `Map`s).
pub fn record_to_js(record: &Record) -> Result<JsValue> {
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    Ok(record.serialize(&serializer)?)
}

pub fn record_from_js(value: JsValue) -> Result<Record> {
    Ok(serde_wasm_bindgen::from_value(value)?)
}

pub fn key_range_to_js(range: &KeyRange) -> Result<IdbKeyRange> {
    let bound = match (&range.lower, &range.upper) {
        (Some(lower), Some(upper)) => IdbKeyRange::bound_with_lower_open_and_upper_open(
            &key_to_js(&lower.key),
            &key_to_js(&upper.key),
            lower.open,
            upper.open,
        ),
        (Some(lower), None) => IdbKeyRange::lower_bound_with_open(&key_to_js(&lower.key), lower.open),
        (None, Some(upper)) => IdbKeyRange::upper_bound_with_open(&key_to_js(&upper.key), upper.open),
        (None, None) => {
            return Err(IndexedDbError::JsValue(
                "key range without bounds".into(),
            ))
        }
    };
    bound.map_err(IndexedDbError::from_dom)
}

pub fn direction_to_js(direction: Direction) -> IdbCursorDirection {
    match direction {
        Direction::Next => IdbCursorDirection::Next,
        Direction::NextUnique => IdbCursorDirection::Nextunique,
        Direction::Prev => IdbCursorDirection::Prev,
        Direction::PrevUnique => IdbCursorDirection::Prevunique,
    }
}
