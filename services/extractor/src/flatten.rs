//! Flattens nested JSON objects into a single raw field map.

use serde_json::{Map, Value};

use crate::table::RawFieldMap;

pub const KEY_SEPARATOR: &str = "_";

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}{}{}", prefix, KEY_SEPARATOR, key)
    }
}

/// String form of a leaf value. Strings are taken verbatim, `null` becomes
/// "null" (a placeholder downstream) and everything else is its JSON text.
fn leaf_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn flatten_into(value: &Value, prefix: &str, out: &mut RawFieldMap) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(child, &join_key(prefix, key), out);
            }
        }
        Value::Array(items) if matches!(items.first(), Some(Value::Object(_))) => {
            for (idx, item) in items.iter().enumerate() {
                flatten_into(item, &join_key(prefix, &idx.to_string()), out);
            }
        }
        leaf => out.insert(prefix, leaf_text(leaf)),
    }
}

/// Flattens `value` under `prefix`, joining nested keys with `_`.
///
/// A list whose first element is an object is expanded element by element
/// under index-suffixed keys; any other list is stored as its JSON text.
pub fn flatten(value: &Value, prefix: &str) -> RawFieldMap {
    let mut out = RawFieldMap::new();
    flatten_into(value, prefix, &mut out);
    out
}

/// Flattens a top-level JSON object with no prefix.
pub fn flatten_object(map: &Map<String, Value>) -> RawFieldMap {
    let mut out = RawFieldMap::new();
    for (key, child) in map {
        flatten_into(child, key, &mut out);
    }
    out
}
