//! Untyped rows flowing between primitives.

use serde_json::{Map, Value};

/// A loosely typed record: the unit DynamicJoin and the formatter operate on.
pub type Row = Map<String, Value>;

/// Look up a dotted path (`dimensions.entity_id`, `items.0.name`) in a JSON value.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a scalar as a join/grouping key. Objects and arrays have no key form.
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
