//! Strip image-like fields from stored payloads.

use serde_json::Value;

/// Keys dropped wherever they appear.
const DROPPED_KEYS: [&str; 3] = ["picture", "avatar", "image"];

/// Strings longer than this are treated as blobs and dropped.
const MAX_STRING_LEN: usize = 2048;

/// Remove image/binary sub-fields, recursing into objects and arrays.
pub fn sanitize_payload(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|k, v| !DROPPED_KEYS.contains(&k.as_str()) && !is_blob(v));
            for v in map.values_mut() {
                sanitize_payload(v);
            }
        }
        Value::Array(items) => {
            items.retain(|v| !is_blob(v));
            for v in items.iter_mut() {
                sanitize_payload(v);
            }
        }
        _ => {}
    }
}

fn is_blob(v: &Value) -> bool {
    match v {
        Value::String(s) => s.starts_with("data:") || s.len() > MAX_STRING_LEN,
        _ => false,
    }
}
