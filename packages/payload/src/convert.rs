//! Conversions between Value and serde types.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::Value;

/// Convert a Value to a Rust type via serde.
///
/// Bytes become base64 strings and extension values are unwrapped to their
/// data, so this is only lossless for plain JSON-shaped values.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value_to_json(value))?)
}

/// Convert a Rust type to a Value via serde.
pub fn to_value<T: Serialize>(data: &T) -> Result<Value> {
    Ok(json_to_value(serde_json::to_value(data)?))
}

/// Convert our Value to serde_json::Value.
pub fn value_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(b),
        Value::Integer(i) => serde_json::Value::Number(i.into()),
        Value::Float(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s),
        Value::Bytes(b) => {
            use base64::Engine;
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(&b))
        }
        Value::Array(arr) => serde_json::Value::Array(arr.into_iter().map(value_to_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, value_to_json(v)))
                .collect(),
        ),
        Value::Extension { data, .. } => value_to_json(*data),
    }
}

/// Convert serde_json::Value to our Value.
pub fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                // Fallback for very large numbers
                Value::String(n.to_string())
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(arr) => Value::Array(arr.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        label: String,
        count: u32,
        enabled: bool,
    }

    #[test]
    fn roundtrip_struct() {
        let original = Counter {
            label: "clicks".to_string(),
            count: 3,
            enabled: true,
        };

        let value = to_value(&original).unwrap();
        let recovered: Counter = from_value(value).unwrap();

        assert_eq!(original, recovered);
    }

    #[test]
    fn json_numbers_keep_their_kind() {
        let value = json_to_value(serde_json::json!({ "i": 42, "f": 2.5 }));
        assert_eq!(value.get("i"), Some(&Value::Integer(42)));
        assert_eq!(value.get("f"), Some(&Value::Float(2.5)));
    }

    #[test]
    fn extension_unwraps_to_data() {
        let value = Value::extension("Date", Value::from("2024-01-01"));
        assert_eq!(value_to_json(value), serde_json::json!("2024-01-01"));
    }

    #[test]
    fn non_finite_float_becomes_null() {
        assert_eq!(value_to_json(Value::Float(f64::NAN)), serde_json::Value::Null);
    }
}
