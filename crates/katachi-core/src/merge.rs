//! Deep merge over JSON value trees
//!
//! Two cases: objects merge key-wise and recurse, everything else is
//! replaced by the source value. Scalar/array collisions always choose
//! source.

use serde_json::Value;

/// Merge `src` into `dest` in place
pub fn deep_merge(dest: &mut Value, src: &Value) {
    match (dest, src) {
        (Value::Object(dest_map), Value::Object(src_map)) => {
            for (key, src_value) in src_map {
                match dest_map.get_mut(key) {
                    Some(dest_value) => deep_merge(dest_value, src_value),
                    None => {
                        dest_map.insert(key.clone(), src_value.clone());
                    }
                }
            }
        }
        (dest_slot, src_value) => *dest_slot = src_value.clone(),
    }
}
