//! Wire codec with named reducer/reviver pairs.
//!
//! The wire form is plain JSON with one extension: a JSON array whose first
//! element is a string starting with `$` is a tagged value.
//!
//! ```text
//! tagged   := [ "$" name , data ]      revived by the reviver registered as `name`
//! escaped  := [ "$" , item* ]          a plain array whose first item starts with `$`
//! ```
//!
//! `Bytes` (base64) and `Float` (NaN and the infinities) are built in. Every
//! other non-JSON value has to go through a reducer registered by name on the
//! encoding side and a reviver registered under the same name on the
//! decoding side.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine;
use serde_json::Value as Json;

use crate::error::{Error, Result};
use crate::Value;

const TAG_PREFIX: char = '$';
const ESCAPE: &str = "$";
const BYTES: &str = "Bytes";
const FLOAT: &str = "Float";

/// Turns values of a custom type into a serializable value.
///
/// Returning `None` means "not mine"; the next reducer is consulted.
pub trait PayloadReducer: Send + Sync {
    fn reduce(&self, value: &Value) -> Option<Value>;
}

impl<F> PayloadReducer for F
where
    F: Fn(&Value) -> Option<Value> + Send + Sync,
{
    fn reduce(&self, value: &Value) -> Option<Value> {
        self(value)
    }
}

/// Rebuilds a custom value from what its reducer produced.
pub trait PayloadReviver: Send + Sync {
    fn revive(&self, data: Value) -> Result<Value>;
}

impl<F> PayloadReviver for F
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    fn revive(&self, data: Value) -> Result<Value> {
        self(data)
    }
}

/// Registry of reducers and revivers plus the encoder/decoder that uses them.
#[derive(Clone, Default)]
pub struct PayloadCodec {
    reducers: Vec<(String, Arc<dyn PayloadReducer>)>,
    revivers: BTreeMap<String, Arc<dyn PayloadReviver>>,
}

impl PayloadCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reducer. Reducers are consulted in registration order on
    /// every value before the built-in rules apply.
    pub fn register_reducer(
        &mut self,
        name: impl Into<String>,
        reducer: impl PayloadReducer + 'static,
    ) -> Result<()> {
        let name = checked_name(name.into())?;
        if self.reducers.iter().any(|(n, _)| *n == name) {
            return Err(Error::DuplicateType { name });
        }
        self.reducers.push((name, Arc::new(reducer)));
        Ok(())
    }

    pub fn register_reviver(
        &mut self,
        name: impl Into<String>,
        reviver: impl PayloadReviver + 'static,
    ) -> Result<()> {
        let name = checked_name(name.into())?;
        if self.revivers.contains_key(&name) {
            return Err(Error::DuplicateType { name });
        }
        self.revivers.insert(name, Arc::new(reviver));
        Ok(())
    }

    /// Register both halves for `Value::Extension` values of `kind`.
    pub fn register_extension(&mut self, kind: impl Into<String>) -> Result<()> {
        let kind = kind.into();
        let reduce_kind = kind.clone();
        self.register_reducer(kind.clone(), move |value: &Value| {
            value.as_extension(&reduce_kind).cloned()
        })?;
        let revive_kind = kind.clone();
        self.register_reviver(kind, move |data: Value| -> Result<Value> {
            Ok(Value::extension(revive_kind.clone(), data))
        })
    }

    /// Whether a reviver exists for `name` (built-ins included).
    pub fn has_reviver(&self, name: &str) -> bool {
        name == BYTES || name == FLOAT || self.revivers.contains_key(name)
    }

    /// Encode a value into its wire JSON.
    pub fn encode(&self, value: &Value) -> Result<Json> {
        for (name, reducer) in &self.reducers {
            if let Some(reduced) = reducer.reduce(value) {
                return Ok(tagged(name, self.encode(&reduced)?));
            }
        }

        Ok(match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Integer(i) => Json::Number((*i).into()),
            Value::Float(f) => match serde_json::Number::from_f64(*f) {
                Some(n) => Json::Number(n),
                None => tagged(FLOAT, Json::String(non_finite_name(*f).to_string())),
            },
            Value::String(s) => Json::String(s.clone()),
            Value::Bytes(b) => tagged(
                BYTES,
                Json::String(base64::engine::general_purpose::STANDARD.encode(b)),
            ),
            Value::Array(items) => {
                let mut encoded = items
                    .iter()
                    .map(|item| self.encode(item))
                    .collect::<Result<Vec<_>>>()?;
                if looks_tagged(encoded.first()) {
                    encoded.insert(0, Json::String(ESCAPE.to_string()));
                }
                Json::Array(encoded)
            }
            Value::Map(map) => {
                let mut object = serde_json::Map::new();
                for (key, item) in map {
                    object.insert(key.clone(), self.encode(item)?);
                }
                Json::Object(object)
            }
            Value::Extension { kind, .. } => {
                return Err(Error::Unserializable { kind: kind.clone() });
            }
        })
    }

    /// Decode wire JSON back into a value.
    pub fn decode(&self, json: Json) -> Result<Value> {
        Ok(match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(mut items) => {
                if !looks_tagged(items.first()) {
                    return Ok(Value::Array(
                        items
                            .into_iter()
                            .map(|item| self.decode(item))
                            .collect::<Result<_>>()?,
                    ));
                }
                let head = items.remove(0);
                let name = match head {
                    Json::String(s) => s,
                    _ => return Err(Error::malformed("tag must be a string")),
                };
                if name == ESCAPE {
                    return Ok(Value::Array(
                        items
                            .into_iter()
                            .map(|item| self.decode(item))
                            .collect::<Result<_>>()?,
                    ));
                }
                if items.len() != 1 {
                    return Err(Error::malformed(format!(
                        "tagged value '{}' must carry exactly one element",
                        name
                    )));
                }
                let name = &name[TAG_PREFIX.len_utf8()..];
                let data = self.decode(items.remove(0))?;
                self.revive(name, data)?
            }
            Json::Object(object) => {
                let mut map = BTreeMap::new();
                for (key, item) in object {
                    map.insert(key, self.decode(item)?);
                }
                Value::Map(map)
            }
        })
    }

    /// Encode straight to JSON text.
    pub fn to_string(&self, value: &Value) -> Result<String> {
        Ok(serde_json::to_string(&self.encode(value)?)?)
    }

    /// Decode from JSON text.
    pub fn from_str(&self, text: &str) -> Result<Value> {
        self.decode(serde_json::from_str(text)?)
    }

    fn revive(&self, name: &str, data: Value) -> Result<Value> {
        match name {
            BYTES => {
                let text = data.as_str().ok_or_else(|| Error::Revive {
                    name: BYTES.to_string(),
                    message: "expected a base64 string".to_string(),
                })?;
                base64::engine::general_purpose::STANDARD
                    .decode(text)
                    .map(Value::Bytes)
                    .map_err(|e| Error::Revive {
                        name: BYTES.to_string(),
                        message: e.to_string(),
                    })
            }
            FLOAT => match data.as_str() {
                Some("NaN") => Ok(Value::Float(f64::NAN)),
                Some("Infinity") => Ok(Value::Float(f64::INFINITY)),
                Some("-Infinity") => Ok(Value::Float(f64::NEG_INFINITY)),
                _ => Err(Error::Revive {
                    name: FLOAT.to_string(),
                    message: "expected NaN, Infinity or -Infinity".to_string(),
                }),
            },
            other => match self.revivers.get(other) {
                Some(reviver) => reviver.revive(data),
                None => Err(Error::UnknownReviver {
                    name: other.to_string(),
                }),
            },
        }
    }
}

impl std::fmt::Debug for PayloadCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCodec")
            .field(
                "reducers",
                &self.reducers.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field("revivers", &self.revivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn checked_name(name: String) -> Result<String> {
    if name.is_empty() || name == BYTES || name == FLOAT {
        return Err(Error::DuplicateType { name });
    }
    Ok(name)
}

fn tagged(name: &str, data: Json) -> Json {
    Json::Array(vec![Json::String(format!("{}{}", TAG_PREFIX, name)), data])
}

fn looks_tagged(first: Option<&Json>) -> bool {
    matches!(first, Some(Json::String(s)) if s.starts_with(TAG_PREFIX))
}

fn non_finite_name(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f > 0.0 {
        "Infinity"
    } else {
        "-Infinity"
    }
}
