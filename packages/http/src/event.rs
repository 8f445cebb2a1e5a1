//! [`RequestEvent`] over `http` request and response types.

use std::sync::{Mutex, MutexGuard};

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode, Uri};
use isle_app::RequestEvent;
use tracing::warn;

#[derive(Debug, Default)]
struct Outgoing {
    status: Option<StatusCode>,
    headers: Vec<(HeaderName, HeaderValue)>,
}

/// The incoming request plus whatever the render decided about the response.
#[derive(Debug)]
pub struct HttpRequestEvent {
    method: http::Method,
    uri: Uri,
    headers: HeaderMap,
    outgoing: Mutex<Outgoing>,
}

impl HttpRequestEvent {
    pub fn from_request<B>(request: &http::Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            outgoing: Mutex::default(),
        }
    }

    fn outgoing(&self) -> MutexGuard<'_, Outgoing> {
        self.outgoing.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn method(&self) -> &http::Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Status set during the render, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.outgoing().status
    }

    /// Copy the recorded status and headers onto `response`.
    pub fn apply<B>(&self, response: &mut http::Response<B>) {
        let outgoing = self.outgoing();
        if let Some(status) = outgoing.status {
            *response.status_mut() = status;
        }
        for (name, value) in &outgoing.headers {
            response.headers_mut().append(name.clone(), value.clone());
        }
    }
}

impl RequestEvent for HttpRequestEvent {
    fn path(&self) -> String {
        self.uri
            .path_and_query()
            .map_or_else(|| self.uri.path().to_string(), |pq| pq.as_str().to_string())
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    fn set_status(&self, status: u16, _message: Option<&str>) {
        match StatusCode::from_u16(status) {
            Ok(status) => self.outgoing().status = Some(status),
            Err(_) => warn!(status, "ignoring invalid response status"),
        }
    }

    fn append_header(&self, name: &str, value: &str) {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => self.outgoing().headers.push((name, value)),
            _ => warn!(header = name, "ignoring invalid response header"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_applies_the_response() {
        let request = http::Request::get("/products?page=2")
            .header("X-Isle-Prerender", "1")
            .body(())
            .unwrap();
        let event = HttpRequestEvent::from_request(&request);
        assert_eq!(event.path(), "/products?page=2");
        assert_eq!(event.header("x-isle-prerender").as_deref(), Some("1"));
        assert_eq!(event.header("missing"), None);

        event.set_status(404, Some("Not Found"));
        event.append_header("x-isle-prerender", "/products/_payload.json");
        event.append_header("bad header", "x");
        event.set_status(1000, None);

        let mut response = http::Response::new(());
        event.apply(&mut response);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get_all("x-isle-prerender").iter().count(),
            1
        );
    }
}
