//! Deep scans over untyped JSON values.
//!
//! The remote protocol is not formally specified, so a few facts (session
//! identity, ack counters) can appear at arbitrary depth inside otherwise
//! opaque messages. These walks are the only place in the crate that
//! searches shape-agnostically; everything else dispatches on known tags.

use serde_json::Value;

/// Finds the first non-empty string value stored under `field` anywhere in
/// the tree, depth-first, objects before their values, arrays in order.
pub fn find_first_string<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    match value {
        Value::Object(map) => {
            if let Some(s) = map.get(field).and_then(Value::as_str) {
                if !s.is_empty() {
                    return Some(s);
                }
            }
            map.values().find_map(|v| find_first_string(v, field))
        }
        Value::Array(items) => items.iter().find_map(|v| find_first_string(v, field)),
        _ => None,
    }
}

/// Finds the first integer value stored under `field` anywhere in the tree.
pub fn find_first_i64(value: &Value, field: &str) -> Option<i64> {
    match value {
        Value::Object(map) => {
            if let Some(n) = map.get(field).and_then(Value::as_i64) {
                return Some(n);
            }
            map.values().find_map(|v| find_first_i64(v, field))
        }
        Value::Array(items) => items.iter().find_map(|v| find_first_i64(v, field)),
        _ => None,
    }
}

/// Returns the maximum integer stored under any field whose name contains
/// `fragment` (case-insensitive), at any depth. `None` if no such field
/// carries an integer.
pub fn max_numeric_field_containing(value: &Value, fragment: &str) -> Option<i64> {
    let fragment = fragment.to_ascii_lowercase();
    let mut best: Option<i64> = None;
    scan_numeric(value, &fragment, &mut best);
    best
}

fn scan_numeric(value: &Value, fragment: &str, best: &mut Option<i64>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if key.to_ascii_lowercase().contains(fragment) {
                    if let Some(n) = v.as_i64() {
                        *best = Some(best.map_or(n, |b| b.max(n)));
                    }
                }
                scan_numeric(v, fragment, best);
            }
        }
        Value::Array(items) => {
            for v in items {
                scan_numeric(v, fragment, best);
            }
        }
        _ => {}
    }
}
