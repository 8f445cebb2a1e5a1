//! The Value type - the data model of the payload.
//!
//! Everything stored under `data` and `state` is a `Value`. It maps directly
//! to JSON, with two additions JSON lacks: raw bytes and typed extension
//! values. Both only reach the wire through a registered reducer.

use std::collections::BTreeMap;

/// A tree-shaped value held by the payload store.
///
/// # Design Notes
///
/// - Uses `BTreeMap` for deterministic ordering (stable hashing and output)
/// - `Bytes` and non-finite `Float`s are carried by built-in reducers
/// - `Extension` carries an application type that a named reducer/reviver
///   pair knows how to move across the wire
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit floating point, including NaN and the infinities.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Key-value map with string keys.
    Map(BTreeMap<String, Value>),
    /// A value owned by the reducer/reviver pair registered as `kind`.
    Extension { kind: String, data: Box<Value> },
}

impl Value {
    /// Create an empty map.
    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Create an empty array.
    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    /// Wrap `data` as an extension value of the given kind.
    pub fn extension(kind: impl Into<String>, data: Value) -> Self {
        Value::Extension {
            kind: kind.into(),
            data: Box::new(data),
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a map.
    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Borrow the string contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read the integer, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Borrow the map entries, if this is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow the extension data when this is an extension of `kind`.
    pub fn as_extension(&self, kind: &str) -> Option<&Value> {
        match self {
            Value::Extension { kind: k, data } if k == kind => Some(data),
            _ => None,
        }
    }

    /// Get a nested value by a `/`-separated path.
    ///
    /// Returns `None` if the path doesn't exist or can't be navigated
    /// (e.g., trying to index into a string). The empty path is `self`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = match current {
                Value::Map(map) => map.get(component)?,
                Value::Array(arr) => {
                    let index: usize = component.parse().ok()?;
                    arr.get(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Structural equality that also treats `NaN == NaN`.
    ///
    /// Payload round-trips must preserve NaN, which plain `PartialEq` cannot
    /// observe.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.same_as(vb))
            }
            (
                Value::Extension { kind: ka, data: da },
                Value::Extension { kind: kb, data: db },
            ) => ka == kb && da.same_as(db),
            (a, b) => a == b,
        }
    }
}

// Conversion from common types

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
