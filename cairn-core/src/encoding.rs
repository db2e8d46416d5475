//! Canonical value encoding.
//!
//! Every value persisted by the primitives goes through this module first.
//! The canonical form is JSON with object keys sorted lexicographically at
//! every nesting level and all non-ASCII characters escaped as `\uXXXX`, so
//! that equal values always produce byte-identical encodings. Fingerprints
//! and Bloom filter bit offsets depend on this determinism.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Encode a value into its canonical textual form.
///
/// # Errors
///
/// Returns [`Error::Encoding`] if the value is not representable as JSON
/// (for example a map with non-string keys).
pub fn encode<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value).map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(encode_value(&value))
}

/// Encode an already-converted [`Value`]. Infallible.
#[must_use]
pub fn encode_value(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Decode a canonically encoded value.
///
/// # Errors
///
/// Returns [`Error::Encoding`] if the input is not valid JSON or does not
/// deserialize into `T`.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| Error::Encoding(e.to_string()))
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Re-keying through a BTreeMap gives the sorted iteration order.
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, item)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(item, out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c if c.is_ascii() => out.push(c),
            c => {
                // Characters above the BMP escape as a surrogate pair.
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn object_keys_are_sorted() {
        let value = json!({"zebra": 1, "apple": 2, "mango": 3});
        assert_eq!(encode_value(&value), r#"{"apple":2,"mango":3,"zebra":1}"#);
    }

    #[test]
    fn nested_objects_sort_at_every_level() {
        let value = json!({"outer": {"b": 1, "a": 2}, "also": [{"z": 0, "y": 1}]});
        assert_eq!(
            encode_value(&value),
            r#"{"also":[{"y":1,"z":0}],"outer":{"a":2,"b":1}}"#
        );
    }

    #[test]
    fn non_ascii_escapes_to_u_sequences() {
        let value = json!("héllo");
        assert_eq!(encode_value(&value), "\"h\\u00e9llo\"");
    }

    #[test]
    fn astral_characters_escape_as_surrogate_pairs() {
        let value = json!("🎉");
        assert_eq!(encode_value(&value), "\"\\ud83c\\udf89\"");
    }

    #[test]
    fn control_characters_escape() {
        let value = json!("a\nb\u{01}c");
        assert_eq!(encode_value(&value), "\"a\\nb\\u0001c\"");
    }

    #[test]
    fn round_trip_preserves_values() {
        let original = json!({
            "name": "café",
            "count": 42,
            "nested": {"flag": true, "items": [1, 2.5, null]},
        });
        let encoded = encode(&original).unwrap();
        let decoded: serde_json::Value = decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn equal_values_encode_identically() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(encode_value(&a), encode_value(&b));
    }

    #[test]
    fn non_string_map_keys_are_rejected() {
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1u8], "value");
        assert!(matches!(encode(&map), Err(Error::Encoding(_))));
    }
}
