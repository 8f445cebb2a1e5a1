//! Island wire types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IslandError, Result};
use crate::key;

/// Head fragments an island contributes to the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IslandHead {
    #[serde(default)]
    pub link: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    pub style: Vec<BTreeMap<String, String>>,
}

impl IslandHead {
    pub fn is_empty(&self) -> bool {
        self.link.is_empty() && self.style.is_empty()
    }

    /// Render as HTML tags.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for link in &self.link {
            out.push_str("<link");
            for (name, value) in link {
                out.push_str(&format!(" {}=\"{}\"", name, crate::marker::encode_entities(value)));
            }
            out.push('>');
        }
        for style in &self.style {
            let css = style.get("innerHTML").map(String::as_str).unwrap_or_default();
            out.push_str(&format!("<style>{}</style>", css));
        }
        out
    }
}

/// Data for re-invoking one slot on the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotResponse {
    /// One entry per slot invocation.
    #[serde(default)]
    pub props: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// A client-hydrated component nested in an island.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientComponentRef {
    /// Code-split chunk to load.
    pub chunk: String,
    #[serde(default)]
    pub props: Value,
    /// Server-rendered markup of the component.
    #[serde(default)]
    pub html: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub slots: BTreeMap<String, String>,
}

/// The response of the island wire endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IslandResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub html: String,
    #[serde(default)]
    pub head: IslandHead,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub slots: BTreeMap<String, SlotResponse>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ClientComponentRef>,
}

/// One request for an island render.
#[derive(Debug, Clone, PartialEq)]
pub struct IslandRequest {
    pub name: String,
    /// Hash from the wire path, if it had one.
    pub hash: Option<String>,
    pub props: Value,
    /// Route context; always carries `url`.
    pub context: Map<String, Value>,
}

impl IslandRequest {
    pub fn new(name: impl Into<String>, props: Value) -> Self {
        let mut context = Map::new();
        context.insert("url".into(), Value::from("/"));
        Self {
            name: name.into(),
            hash: None,
            props,
            context,
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context.extend(context);
        self
    }

    pub fn url(&self) -> &str {
        self.context.get("url").and_then(Value::as_str).unwrap_or("/")
    }

    /// The hash the client computes for this request.
    pub fn computed_hash(&self, source: Option<&str>) -> String {
        key::island_hash(&self.name, &self.props, &Value::Object(self.context.clone()), source)
    }

    /// Build a request from a wire path and its context fields.
    ///
    /// `props`, if present, is JSON text; every other field is route context.
    pub fn from_wire(prefix: &str, path: &str, fields: Map<String, Value>) -> Result<Self> {
        let (name, hash) = key::parse_island_path(prefix, path)?;
        let mut context = Map::new();
        context.insert("url".into(), Value::from("/"));
        let mut props = Value::Object(Map::new());
        for (field, value) in fields {
            if field == "props" {
                props = match value {
                    Value::String(text) if text.is_empty() => Value::Object(Map::new()),
                    Value::String(text) => serde_json::from_str(&text).map_err(IslandError::MalformedProps)?,
                    Value::Null => Value::Object(Map::new()),
                    other => other,
                };
            } else {
                context.insert(field, value);
            }
        }
        Ok(Self {
            name,
            hash,
            props,
            context,
        })
    }

    /// Context fields for the wire, with `props` double-encoded.
    pub fn wire_fields(&self) -> Map<String, Value> {
        let mut fields = self.context.clone();
        if !self.props.is_null() {
            fields.insert("props".into(), Value::from(self.props.to_string()));
        }
        fields
    }

    /// Query pairs for a GET request.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.wire_fields()
            .into_iter()
            .map(|(name, value)| match value {
                Value::String(text) => (name, text),
                other => (name, other.to_string()),
            })
            .collect()
    }
}
