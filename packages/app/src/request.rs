//! The request/response collaborator the server render talks to.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Response header hinting that the page may be prerendered.
pub const PRERENDER_HEADER: &str = "x-isle-prerender";

/// What the runtime needs from the HTTP layer for one request.
pub trait RequestEvent: Send + Sync {
    /// Request path including the query string.
    fn path(&self) -> String;

    /// Header value by case-insensitive name.
    fn header(&self, name: &str) -> Option<String>;

    fn set_status(&self, status: u16, message: Option<&str>);

    /// Append a response header (repeated names are kept).
    fn append_header(&self, name: &str, value: &str);
}

/// An in-memory request event; handy for rendering outside a server.
#[derive(Debug, Default)]
pub struct StaticRequest {
    path: String,
    headers: BTreeMap<String, String>,
    response: Mutex<StaticResponse>,
}

/// What a [`StaticRequest`] recorded about the response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticResponse {
    pub status: Option<u16>,
    pub status_message: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl StaticRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn response(&self) -> StaticResponse {
        self.response
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl RequestEvent for StaticRequest {
    fn path(&self) -> String {
        self.path.clone()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }

    fn set_status(&self, status: u16, message: Option<&str>) {
        let mut response = self.response.lock().unwrap_or_else(|p| p.into_inner());
        response.status = Some(status);
        response.status_message = message.map(str::to_string);
    }

    fn append_header(&self, name: &str, value: &str) {
        self.response
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .headers
            .push((name.to_string(), value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive() {
        let req = StaticRequest::new("/a?b=1").with_header("Accept", "text/html");
        assert_eq!(req.header("accept").as_deref(), Some("text/html"));
        assert_eq!(req.path(), "/a?b=1");
    }

    #[test]
    fn records_response() {
        let req = StaticRequest::new("/");
        req.set_status(404, Some("Not Found"));
        req.append_header(PRERENDER_HEADER, "1");
        req.append_header(PRERENDER_HEADER, "2");
        let response = req.response();
        assert_eq!(response.status, Some(404));
        assert_eq!(response.headers.len(), 2);
    }
}
