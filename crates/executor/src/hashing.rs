//! Canonical serialization and result hashing.
//!
//! Object keys are written in lexicographic order at every depth so the
//! digest does not depend on map ordering features of `serde_json`.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize `value` canonically: compact, object keys sorted.
pub fn canonical_json(value: &Value) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

/// Hex SHA-256 digest of the canonical serialization of `value`.
pub fn result_hash(value: &Value) -> serde_json::Result<String> {
    let bytes = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> serde_json::Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(item, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_are_sorted_at_every_depth() {
        let value = json!({"b": 1, "a": {"z": true, "m": [3, {"y": null, "x": "s"}]}});
        let bytes = canonical_json(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"m":[3,{"x":"s","y":null}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_hash_ignores_insertion_order() {
        let mut first = serde_json::Map::new();
        first.insert("model".into(), json!("llama-2-7b"));
        first.insert("tokens".into(), json!(150));
        let mut second = serde_json::Map::new();
        second.insert("tokens".into(), json!(150));
        second.insert("model".into(), json!("llama-2-7b"));

        assert_eq!(
            result_hash(&Value::Object(first)).unwrap(),
            result_hash(&Value::Object(second)).unwrap()
        );
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        // sha256("{}")
        assert_eq!(
            result_hash(&json!({})).unwrap(),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }
}
