use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Change-detection digest of a normalized record.
///
/// The record is serialized to JSON with object keys in sorted order and the
/// top-level `raw_data` member removed, then hashed with SHA-256 (hex).
pub fn change_hash<T: Serialize>(record: &T) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(record)?;
    if let Value::Object(map) = &mut value {
        map.remove("raw_data");
    }

    let mut canonical = String::new();
    write_canonical(&value, &mut canonical)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                if let Some(child) = map.get(key) {
                    write_canonical(child, out)?;
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_the_hash() {
        let a = json!({"name": "Acme", "phone": "1", "nested": {"b": 2, "a": 1}});
        let b = json!({"nested": {"a": 1, "b": 2}, "phone": "1", "name": "Acme"});
        assert_eq!(change_hash(&a).expect("hash"), change_hash(&b).expect("hash"));
    }

    #[test]
    fn raw_data_is_excluded() {
        let a = json!({"name": "Acme", "raw_data": {"_links": "x"}});
        let b = json!({"name": "Acme", "raw_data": {"_links": "y"}});
        let c = json!({"name": "Acme Corp", "raw_data": {"_links": "x"}});
        assert_eq!(change_hash(&a).expect("hash"), change_hash(&b).expect("hash"));
        assert_ne!(change_hash(&a).expect("hash"), change_hash(&c).expect("hash"));
    }
}
