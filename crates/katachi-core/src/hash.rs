//! Content hashing over canonical JSON
//!
//! Hashes must be stable across processes, so values are serialized with
//! object keys sorted before hashing.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a value to canonical JSON: object keys sorted, no whitespace
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json string serialization of a String cannot fail
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Hex-encoded SHA-256 of the canonical JSON form of a value
pub fn content_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_value(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&json).as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
