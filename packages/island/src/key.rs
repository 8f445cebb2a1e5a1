//! Stable island keys and wire paths.
//!
//! An island is addressed by `<name>_<hash>`, where the hash covers the
//! component name, its props (minus reserved keys), the route context and
//! the optional remote source.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{IslandError, Result};

/// Hex digits kept from the digest.
const HASH_LEN: usize = 16;

/// Whether a prop key is reserved and left out of the hash.
pub fn is_reserved_prop(key: &str) -> bool {
    key.starts_with("data-v-") || key.starts_with("__")
}

/// `props` without reserved keys. Non-object props hash as-is.
pub fn filter_props(props: &Value) -> Value {
    match props {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !is_reserved_prop(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Map<_, _>>(),
        ),
        other => other.clone(),
    }
}

/// The stable hash for one island invocation.
pub fn island_hash(name: &str, props: &Value, context: &Value, source: Option<&str>) -> String {
    // serde_json maps are ordered, so equal inputs serialize identically.
    let canonical = Value::Array(vec![
        Value::from(name),
        filter_props(props),
        context.clone(),
        source.map_or(Value::Null, Value::from),
    ]);
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    let mut hash = String::with_capacity(HASH_LEN);
    for byte in digest.iter().take(HASH_LEN / 2) {
        hash.push_str(&format!("{:02x}", byte));
    }
    hash
}

/// Payload and cache key: `<name>_<hash>`.
pub fn island_key(name: &str, hash: &str) -> String {
    format!("{}_{}", name, hash)
}

/// Wire endpoint path for an island.
pub fn island_path(prefix: &str, name: &str, hash: &str) -> String {
    format!("{}/{}.json", prefix.trim_end_matches('/'), island_key(name, hash))
}

/// Split a wire path into component name and hash.
///
/// The name may itself contain underscores; the hash is everything after the
/// last one. A query string is ignored.
pub fn parse_island_path(prefix: &str, path: &str) -> Result<(String, Option<String>)> {
    let malformed = || IslandError::MalformedPath {
        path: path.to_string(),
    };
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let rest = path
        .strip_prefix(prefix.trim_end_matches('/'))
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(malformed)?;
    let stem = rest.strip_suffix(".json").ok_or_else(malformed)?;
    if stem.is_empty() || stem.contains('/') {
        return Err(malformed());
    }

    match stem.rsplit_once('_') {
        Some((name, hash)) if !name.is_empty() && !hash.is_empty() => {
            Ok((name.to_string(), Some(hash.to_string())))
        }
        Some(_) => Err(malformed()),
        None => Ok((stem.to_string(), None)),
    }
}
