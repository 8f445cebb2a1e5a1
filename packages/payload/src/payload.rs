//! The payload snapshot and its wire shape.

use std::collections::{BTreeMap, BTreeSet};

use crate::codec::PayloadCodec;
use crate::convert::{from_value, to_value};
use crate::error::{Error, Result};
use crate::record::ErrorRecord;
use crate::Value;

/// Prefix applied to user state keys so they never collide with data keys.
pub const STATE_PREFIX: &str = "$s";

/// The internal key under which user state `key` is stored.
pub fn state_key(key: &str) -> String {
    format!("{}{}", STATE_PREFIX, key)
}

/// Everything the server hands to the client for hydration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    /// Results of keyed data fetches.
    pub data: BTreeMap<String, Value>,
    /// Shared state, keyed by [`state_key`].
    pub state: BTreeMap<String, Value>,
    /// Per-key fetch errors, parallel to `data`.
    pub errors: BTreeMap<String, Option<ErrorRecord>>,
    /// Keys of one-time operations that already ran.
    pub once: BTreeSet<String>,
    pub server_rendered: bool,
    pub path: Option<String>,
    /// Unix timestamp in milliseconds.
    pub prerendered_at: Option<i64>,
    /// Global error slot.
    pub error: Option<ErrorRecord>,
    /// Public runtime config exposed to the client.
    pub config: Value,
}

/// A payload split into the part embedded in the page and the part served
/// separately for prerendered routes.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPayload {
    pub initial: Payload,
    pub extracted: Payload,
}

impl Payload {
    /// The structured form handed to the codec.
    pub fn to_value(&self) -> Result<Value> {
        let mut root = BTreeMap::new();
        root.insert("data".to_string(), Value::Map(self.data.clone()));
        root.insert("state".to_string(), Value::Map(self.state.clone()));

        let mut errors = BTreeMap::new();
        for (key, record) in &self.errors {
            let value = match record {
                Some(record) => to_value(record)?,
                None => Value::Null,
            };
            errors.insert(key.clone(), value);
        }
        root.insert("_errors".to_string(), Value::Map(errors));

        root.insert(
            "once".to_string(),
            Value::Array(self.once.iter().map(|k| Value::from(k.as_str())).collect()),
        );
        root.insert(
            "serverRendered".to_string(),
            Value::Bool(self.server_rendered),
        );
        root.insert("path".to_string(), Value::from(self.path.clone()));
        root.insert("prerenderedAt".to_string(), Value::from(self.prerendered_at));
        let error = match &self.error {
            Some(record) => to_value(record)?,
            None => Value::Null,
        };
        root.insert("error".to_string(), error);
        root.insert("config".to_string(), self.config.clone());
        Ok(Value::Map(root))
    }

    /// Rebuild a payload from its structured form.
    ///
    /// Missing sections default to empty, so partial payloads (for example
    /// an extracted data payload) are accepted.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut root = match value {
            Value::Map(map) => map,
            _ => return Err(Error::malformed("payload root must be a map")),
        };

        let mut payload = Payload {
            data: take_map(&mut root, "data")?,
            state: take_map(&mut root, "state")?,
            ..Payload::default()
        };

        for (key, value) in take_map(&mut root, "_errors")? {
            let record = match value {
                Value::Null => None,
                other => Some(from_value::<ErrorRecord>(other)?),
            };
            payload.errors.insert(key, record);
        }

        match root.remove("once") {
            Some(Value::Array(items)) => {
                for item in items {
                    match item {
                        Value::String(key) => {
                            payload.once.insert(key);
                        }
                        _ => return Err(Error::malformed("once entries must be strings")),
                    }
                }
            }
            None | Some(Value::Null) => {}
            Some(_) => return Err(Error::malformed("once must be an array")),
        }

        payload.server_rendered = matches!(root.remove("serverRendered"), Some(Value::Bool(true)));
        payload.path = match root.remove("path") {
            Some(Value::String(path)) => Some(path),
            _ => None,
        };
        payload.prerendered_at = root.remove("prerenderedAt").and_then(|v| v.as_i64());
        payload.error = match root.remove("error") {
            None | Some(Value::Null) => None,
            Some(other) => Some(from_value::<ErrorRecord>(other)?),
        };
        payload.config = root.remove("config").unwrap_or_default();
        Ok(payload)
    }

    /// Encode to wire JSON text.
    pub fn encode(&self, codec: &PayloadCodec) -> Result<String> {
        codec.to_string(&self.to_value()?)
    }

    /// Decode from wire JSON text.
    pub fn decode(codec: &PayloadCodec, text: &str) -> Result<Self> {
        Self::from_value(codec.from_str(text)?)
    }

    /// Split off `data` so it can be served separately.
    pub fn split(&self) -> SplitPayload {
        let initial = Payload {
            data: BTreeMap::new(),
            ..self.clone()
        };
        let extracted = Payload {
            data: self.data.clone(),
            prerendered_at: self.prerendered_at,
            ..Payload::default()
        };
        SplitPayload { initial, extracted }
    }

    /// Merge an extracted payload back in. Incoming data wins.
    pub fn merge_extracted(&mut self, extracted: Payload) {
        self.data.extend(extracted.data);
        if extracted.prerendered_at.is_some() {
            self.prerendered_at = extracted.prerendered_at;
        }
    }
}

fn take_map(root: &mut BTreeMap<String, Value>, key: &str) -> Result<BTreeMap<String, Value>> {
    match root.remove(key) {
        Some(Value::Map(map)) => Ok(map),
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(_) => Err(Error::malformed(format!("'{}' must be a map", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Payload {
        let mut payload = Payload {
            server_rendered: true,
            path: Some("/products/1".to_string()),
            prerendered_at: Some(1_700_000_000_000),
            ..Payload::default()
        };
        payload
            .data
            .insert("product".to_string(), Value::from("widget"));
        payload.state.insert(state_key("count"), Value::from(1i64));
        payload.errors.insert(
            "reviews".to_string(),
            Some(ErrorRecord::new("upstream timeout").with_status(504, "Gateway Timeout")),
        );
        payload.errors.insert("product".to_string(), None);
        payload.once.insert("init".to_string());
        payload
    }

    #[test]
    fn state_keys_are_prefixed() {
        assert_eq!(state_key("count"), "$scount");
    }

    #[test]
    fn encode_decode_roundtrip() {
        let codec = PayloadCodec::new();
        let payload = sample();
        let text = payload.encode(&codec).unwrap();
        let revived = Payload::decode(&codec, &text).unwrap();
        assert_eq!(revived, payload);
    }

    #[test]
    fn revived_state_is_readable() {
        let codec = PayloadCodec::new();
        let mut payload = Payload::default();
        payload.state.insert(state_key("count"), Value::from(1i64));

        let revived = Payload::decode(&codec, &payload.encode(&codec).unwrap()).unwrap();
        assert_eq!(
            revived.state.get(&state_key("count")),
            Some(&Value::Integer(1))
        );
    }

    #[test]
    fn partial_payload_defaults() {
        let codec = PayloadCodec::new();
        let payload = Payload::decode(&codec, r#"{"data":{"a":1}}"#).unwrap();
        assert_eq!(payload.data.get("a"), Some(&Value::Integer(1)));
        assert!(!payload.server_rendered);
        assert!(payload.once.is_empty());
    }

    #[test]
    fn malformed_sections_rejected() {
        let codec = PayloadCodec::new();
        assert!(Payload::decode(&codec, r#"{"data":[1]}"#).is_err());
        assert!(Payload::decode(&codec, r#"{"once":[1]}"#).is_err());
        assert!(Payload::decode(&codec, "[]").is_err());
    }

    #[test]
    fn split_and_merge() {
        let payload = sample();
        let split = payload.split();
        assert!(split.initial.data.is_empty());
        assert_eq!(split.initial.once, payload.once);
        assert_eq!(split.extracted.data, payload.data);

        let mut rebuilt = split.initial.clone();
        rebuilt.merge_extracted(split.extracted);
        assert_eq!(rebuilt, payload);
    }
}
