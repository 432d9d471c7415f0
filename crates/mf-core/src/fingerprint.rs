//! Canonical JSON fingerprints for the idempotency ledger and export
//! signatures.
//!
//! Canonical form: object keys sorted lexicographically at every depth,
//! compact separators, no insignificant whitespace. Two payloads with
//! the same canonical form are the same logical request.

use serde_json::Value;

/// Render a JSON value in canonical (sorted-key, compact) form.
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Fingerprint of an operation intent: canonical JSON of
/// `{"operation": .., "payload": ..}`.
pub fn operation_fingerprint(operation: &str, payload: &Value) -> String {
    canonical_json(&serde_json::json!({
        "operation": operation,
        "payload": payload,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_at_every_depth() {
        let a = json!({"b": 1, "a": {"z": true, "m": [1, {"k2": 2, "k1": 1}]}});
        let b = json!({"a": {"m": [1, {"k1": 1, "k2": 2}], "z": true}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn compact_output() {
        let v = json!({"a": [1, 2], "b": "x y"});
        assert_eq!(canonical_json(&v), r#"{"a":[1,2],"b":"x y"}"#);
    }

    #[test]
    fn operation_changes_fingerprint() {
        let payload = json!({"item_id": "i1"});
        assert_ne!(
            operation_fingerprint("checkout", &payload),
            operation_fingerprint("checkIn", &payload)
        );
    }

    #[test]
    fn payload_changes_fingerprint() {
        assert_ne!(
            operation_fingerprint("checkout", &json!({"item_id": "i1"})),
            operation_fingerprint("checkout", &json!({"item_id": "i2"}))
        );
    }
}
