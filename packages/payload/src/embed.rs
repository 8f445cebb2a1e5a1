//! Embedding the encoded payload into an HTML document.
//!
//! The payload travels in a single JSON script element:
//!
//! ```text
//! <script type="application/json" id="__ISLE_DATA__" data-ssr="true">...</script>
//! <script type="application/json" data-isle-data="shop" data-ssr="false">...</script>
//! ```
//!
//! The first form is used for a single app, the second when several apps
//! share a page. `data-ssr` tells the client whether the markup was server
//! rendered or is an empty client-only shell.

use crate::codec::PayloadCodec;
use crate::error::{Error, Result};
use crate::payload::Payload;

/// Element id used when only one app lives on the page.
pub const DATA_ELEMENT_ID: &str = "__ISLE_DATA__";

/// Attribute naming the app when several share a page.
pub const DATA_APP_ATTR: &str = "data-isle-data";

const SCRIPT_OPEN: &str = "<script";
const SCRIPT_CLOSE: &str = "</script>";

/// A payload recovered from a page.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedPayload {
    /// Whether the page was server rendered.
    pub ssr: bool,
    pub payload: Payload,
}

/// Escape JSON text so it cannot terminate the script element.
pub fn escape_json_for_html(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003C"),
            '>' => out.push_str("\\u003E"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out
}

fn selector(app_id: &str, multi_app: bool) -> String {
    if multi_app {
        format!("{}=\"{}\"", DATA_APP_ATTR, app_id)
    } else {
        format!("id=\"{}\"", DATA_ELEMENT_ID)
    }
}

/// Render the script element carrying `payload`.
pub fn render_script(
    codec: &PayloadCodec,
    payload: &Payload,
    app_id: &str,
    multi_app: bool,
) -> Result<String> {
    let json = payload.encode(codec)?;
    Ok(format!(
        "<script type=\"application/json\" {} data-ssr=\"{}\">{}</script>",
        selector(app_id, multi_app),
        payload.server_rendered,
        escape_json_for_html(&json)
    ))
}

/// Find and decode the payload script for `app_id` in `html`.
///
/// Returns `Ok(None)` when the page carries no payload for this app.
pub fn extract(
    codec: &PayloadCodec,
    html: &str,
    app_id: &str,
    multi_app: bool,
) -> Result<Option<EmbeddedPayload>> {
    let needle = selector(app_id, multi_app);
    let mut rest = html;
    while let Some(start) = rest.find(SCRIPT_OPEN) {
        let after = &rest[start + SCRIPT_OPEN.len()..];
        let tag_end = after
            .find('>')
            .ok_or_else(|| Error::malformed("unterminated script tag"))?;
        let attrs = &after[..tag_end];
        let body_start = &after[tag_end + 1..];
        let body_end = body_start
            .find(SCRIPT_CLOSE)
            .ok_or_else(|| Error::malformed("script element is never closed"))?;

        if attrs.contains(&needle) {
            let ssr = !attrs.contains("data-ssr=\"false\"");
            let payload = Payload::decode(codec, &body_start[..body_end])?;
            return Ok(Some(EmbeddedPayload { ssr, payload }));
        }
        rest = &body_start[body_end + SCRIPT_CLOSE.len()..];
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn sample() -> Payload {
        let mut payload = Payload {
            server_rendered: true,
            ..Payload::default()
        };
        payload.data.insert(
            "snippet".to_string(),
            Value::from("</script><script>alert(1)</script> & \u{2028}"),
        );
        payload
    }

    #[test]
    fn escaped_script_never_closes_early() {
        let codec = PayloadCodec::new();
        let script = render_script(&codec, &sample(), "isle", false).unwrap();
        assert_eq!(script.matches("</script>").count(), 1);
        assert!(!script.contains('\u{2028}'));
        assert!(script.contains("id=\"__ISLE_DATA__\""));
        assert!(script.contains("data-ssr=\"true\""));
    }

    #[test]
    fn extract_roundtrip_single_app() {
        let codec = PayloadCodec::new();
        let payload = sample();
        let html = format!(
            "<html><head><script src=\"/app.js\"></script></head><body><div id=\"app\"></div>{}</body></html>",
            render_script(&codec, &payload, "isle", false).unwrap()
        );
        let embedded = extract(&codec, &html, "isle", false).unwrap().unwrap();
        assert!(embedded.ssr);
        assert_eq!(embedded.payload, payload);
    }

    #[test]
    fn multi_app_selects_by_id() {
        let codec = PayloadCodec::new();
        let mut shop = Payload::default();
        shop.data.insert("who".to_string(), Value::from("shop"));
        let mut blog = Payload {
            server_rendered: true,
            ..Payload::default()
        };
        blog.data.insert("who".to_string(), Value::from("blog"));

        let html = format!(
            "{}{}",
            render_script(&codec, &shop, "shop", true).unwrap(),
            render_script(&codec, &blog, "blog", true).unwrap()
        );

        let found = extract(&codec, &html, "blog", true).unwrap().unwrap();
        assert!(found.ssr);
        assert_eq!(found.payload.data["who"], Value::from("blog"));

        let found = extract(&codec, &html, "shop", true).unwrap().unwrap();
        assert!(!found.ssr);
    }

    #[test]
    fn missing_payload_is_none() {
        let codec = PayloadCodec::new();
        assert!(extract(&codec, "<html></html>", "isle", false)
            .unwrap()
            .is_none());
    }
}
