//! Island markers: the attributes and teleport keys that let the client find
//! insertion points inside server-rendered island HTML.
//!
//! Attributes written into island markup:
//!
//! ```text
//! <div data-island-uid="u1">                       root node of an island
//! <div data-island-uid="u1" data-island-slot="s"   slot placeholder
//!      data-island-slot-data="[...]">
//! <div data-island-uid="u1" data-island-component="c1">   client component
//! ```
//!
//! Teleport keys, each a `;`-separated list of `name=value` fields:
//!
//! ```text
//! uid=<uid>;slot=<name>        slot content for a placeholder
//! uid=<uid>;client=<id>        client component markup
//! island-fallback=<slot>       fallback content for a slot
//! island-slot=<id>;<slot>      slot content of a client component
//! ```
//!
//! Slot fallbacks are wrapped in comment blocks so the client can drop them
//! when it provides the slot itself.
//!
//! Uids and slot names are entity-encoded wherever they are written into
//! markup, so any name survives the trip. Encoded text never contains `>`,
//! which keeps a name from closing a fallback comment early.

use std::collections::BTreeMap;
use std::fmt;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;

pub const UID_ATTR: &str = "data-island-uid";
pub const SLOT_ATTR: &str = "data-island-slot";
pub const SLOT_DATA_ATTR: &str = "data-island-slot-data";
pub const COMPONENT_ATTR: &str = "data-island-component";

/// Tag the view layer wraps a rendered root in.
pub const ROOT_TAG: &str = "isle-root";

lazy_static! {
    static ref UID_RE: Regex = Regex::new(r#"data-island-uid="([^"]*)""#).unwrap();
    static ref SLOT_NAME_RE: Regex = Regex::new(r#"data-island-slot="([^"]*)""#).unwrap();
    static ref SLOT_DATA_RE: Regex =
        Regex::new(r#"<div[^>]*data-island-slot="([^"]*)" data-island-slot-data="([^"]*)"[^>]*>"#).unwrap();
    static ref FALLBACK_RE: Regex =
        Regex::new(r"(?s)<!--island-fallback-start:([^>]*?)-->(.*?)<!--island-fallback-end-->").unwrap();
    static ref ROOT_RE: Regex = Regex::new(r"(?s)^<isle-root[^>]*>(.*)</isle-root>$").unwrap();
    static ref FIRST_TAG_RE: Regex = Regex::new(r"^(\s*<[A-Za-z][A-Za-z0-9-]*)").unwrap();
}

/// A parsed teleport key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TeleportKey {
    Slot { uid: String, slot: String },
    Client { uid: String, client: String },
    Fallback { slot: String },
    ClientSlot { client: String, slot: String },
}

impl TeleportKey {
    pub fn parse(key: &str) -> Option<Self> {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        if let Some(slot) = key.strip_prefix("island-fallback=") {
            return Some(TeleportKey::Fallback {
                slot: non_empty(slot)?,
            });
        }
        if let Some(rest) = key.strip_prefix("island-slot=") {
            let (client, slot) = rest.split_once(';')?;
            return Some(TeleportKey::ClientSlot {
                client: non_empty(client)?,
                slot: non_empty(slot)?,
            });
        }

        let rest = key.strip_prefix("uid=")?;
        let (uid, field) = rest.split_once(';')?;
        let uid = non_empty(uid)?;
        if let Some(slot) = field.strip_prefix("slot=") {
            Some(TeleportKey::Slot {
                uid,
                slot: non_empty(slot)?,
            })
        } else if let Some(client) = field.strip_prefix("client=") {
            Some(TeleportKey::Client {
                uid,
                client: non_empty(client)?,
            })
        } else {
            None
        }
    }

    /// The opening-tag attributes of the placeholder this key fills, if it
    /// fills one.
    fn placeholder_attrs(&self) -> Option<String> {
        match self {
            TeleportKey::Slot { uid, slot } => Some(format!(
                " {}=\"{}\" {}=\"{}\"",
                UID_ATTR,
                encode_entities(uid),
                SLOT_ATTR,
                encode_entities(slot)
            )),
            TeleportKey::Client { uid, client } => Some(format!(
                " {}=\"{}\" {}=\"{}\"",
                UID_ATTR,
                encode_entities(uid),
                COMPONENT_ATTR,
                encode_entities(client)
            )),
            _ => None,
        }
    }
}

impl fmt::Display for TeleportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeleportKey::Slot { uid, slot } => write!(f, "uid={};slot={}", uid, slot),
            TeleportKey::Client { uid, client } => write!(f, "uid={};client={}", uid, client),
            TeleportKey::Fallback { slot } => write!(f, "island-fallback={}", slot),
            TeleportKey::ClientSlot { client, slot } => write!(f, "island-slot={};{}", client, slot),
        }
    }
}

/// Escape text for use inside a double-quoted attribute.
pub fn encode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

pub fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Strip the view layer's root wrapper, if present.
pub fn strip_root(html: &str) -> &str {
    match ROOT_RE.captures(html).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => html,
    }
}

/// Add the uid attribute to the first element of `html`.
pub fn with_root_uid(html: &str, uid: &str) -> String {
    if FIRST_TAG_RE.is_match(html) {
        FIRST_TAG_RE
            .replace(html, |caps: &Captures| format!("{} {}=\"{}\"", &caps[1], UID_ATTR, encode_entities(uid)))
            .into_owned()
    } else {
        format!("<div {}=\"{}\">{}</div>", UID_ATTR, encode_entities(uid), html)
    }
}

/// The uid of the first island root in `html`.
pub fn root_uid(html: &str) -> Option<String> {
    UID_RE.captures(html).map(|c| decode_entities(&c[1]))
}

/// Rewrite every occurrence of uid `from` to `to`.
pub fn reassign_uid(html: &str, from: &str, to: &str) -> String {
    html.replace(
        &format!("{}=\"{}\"", UID_ATTR, encode_entities(from)),
        &format!("{}=\"{}\"", UID_ATTR, encode_entities(to)),
    )
}

/// Distinct names of the slot placeholders in `html`, in order of first
/// appearance.
pub fn slot_names(html: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in SLOT_NAME_RE.captures_iter(html) {
        let name = decode_entities(&caps[1]);
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Slot invocation data, gathered across every placeholder of each slot in
/// document order.
pub fn slot_props(html: &str) -> BTreeMap<String, Vec<Value>> {
    let mut props: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for caps in SLOT_DATA_RE.captures_iter(html) {
        let data = match serde_json::from_str::<Value>(&decode_entities(&caps[2])) {
            Ok(Value::Array(items)) => items,
            Ok(single) => vec![single],
            Err(_) => Vec::new(),
        };
        props.entry(decode_entities(&caps[1])).or_default().extend(data);
    }
    props
}

/// Markup of a slot placeholder, with the fallback block when given.
pub fn slot_placeholder(uid: &str, slot: &str, data: &[Value], fallback: Option<&str>) -> String {
    let data = Value::Array(data.to_vec()).to_string();
    let fallback = fallback.map_or_else(String::new, |html| fallback_block(slot, html));
    format!(
        "<div {}=\"{}\" {}=\"{}\" {}=\"{}\">{}</div>",
        UID_ATTR,
        encode_entities(uid),
        SLOT_ATTR,
        encode_entities(slot),
        SLOT_DATA_ATTR,
        encode_entities(&data),
        fallback
    )
}

/// Markup of the anchor a client component is mounted at.
pub fn client_placeholder(uid: &str, client: &str) -> String {
    format!(
        "<div {}=\"{}\" {}=\"{}\"></div>",
        UID_ATTR,
        encode_entities(uid),
        COMPONENT_ATTR,
        encode_entities(client)
    )
}

pub fn fallback_block(slot: &str, html: &str) -> String {
    format!(
        "<!--island-fallback-start:{}-->{}<!--island-fallback-end-->",
        encode_entities(slot),
        html
    )
}

/// Drop fallback blocks for slots in `provided`; unwrap the others.
pub fn strip_fallbacks(html: &str, provided: &[String]) -> String {
    FALLBACK_RE
        .replace_all(html, |caps: &Captures| {
            let slot = decode_entities(&caps[1]);
            if provided.contains(&slot) {
                String::new()
            } else {
                caps[2].to_string()
            }
        })
        .into_owned()
}

/// Selector of a slot placeholder.
pub fn slot_selector(uid: &str, slot: &str) -> String {
    format!("[{}='{}'] [{}='{}']", UID_ATTR, uid, SLOT_ATTR, slot)
}

/// Selector of a client component anchor.
pub fn client_selector(uid: &str, client: &str) -> String {
    format!("[{}='{}'] [{}='{}']", UID_ATTR, uid, COMPONENT_ATTR, client)
}

/// Insert teleported content after every placeholder it belongs to.
///
/// Used when an island is rendered inline into a full page instead of being
/// served on its own. Keys that do not name a placeholder are skipped.
pub fn replace_teleports(html: &str, teleports: &BTreeMap<String, String>) -> String {
    let mut html = html.to_string();
    for (key, content) in teleports {
        let Some(attrs) = TeleportKey::parse(key).and_then(|k| k.placeholder_attrs()) else {
            continue;
        };
        let mut from = 0;
        while let Some(found) = html[from..].find(&attrs) {
            let start = from + found;
            let Some(close) = html[start..].find('>') else {
                break;
            };
            let at = start + close + 1;
            html.insert_str(at, content);
            from = at + content.len();
        }
    }
    html
}
