//! The island wire endpoint: `GET|POST <prefix>/<name>_<hash>.json`.
//!
//! Route context arrives as query parameters (GET) or a JSON object body
//! (POST). Either way `props` is JSON text inside it.

use std::sync::Arc;

use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use isle_island::{IslandError, IslandRenderer, IslandRequest};
use isle_payload::ErrorRecord;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::event::HttpRequestEvent;

pub const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// Serves island renders over HTTP.
#[derive(Debug, Clone)]
pub struct IslandEndpoint {
    renderer: IslandRenderer,
}

impl IslandEndpoint {
    pub fn new(renderer: IslandRenderer) -> Self {
        Self { renderer }
    }

    pub fn prefix(&self) -> &str {
        self.renderer.config().island_prefix.trim_end_matches('/')
    }

    /// Whether `path` is addressed to this endpoint.
    pub fn matches(&self, path: &str) -> bool {
        path.strip_prefix(self.prefix())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    pub async fn handle<B: AsRef<[u8]>>(&self, request: http::Request<B>) -> http::Response<Vec<u8>> {
        let event = Arc::new(HttpRequestEvent::from_request(&request));
        let method = request.method().clone();
        if method != http::Method::GET && method != http::Method::POST {
            let record = ErrorRecord::new(format!("{} is not supported", method))
                .with_status(405, "Method Not Allowed");
            return json_response(StatusCode::METHOD_NOT_ALLOWED, &record);
        }

        let island_request = match self.parse(&request) {
            Ok(island_request) => island_request,
            Err(err) => return error_response(&err),
        };
        debug!(island = %island_request.name, %method, "island request");

        match self.renderer.render(&island_request, Some(event.clone())).await {
            Ok(rendered) => {
                let mut response = json_response(StatusCode::OK, &rendered);
                event.apply(&mut response);
                response
            }
            Err(err) => {
                warn!(island = %island_request.name, error = %err, "island render failed");
                error_response(&err)
            }
        }
    }

    fn parse<B: AsRef<[u8]>>(&self, request: &http::Request<B>) -> Result<IslandRequest, IslandError> {
        let fields = if request.method() == http::Method::POST {
            let body = request.body().as_ref();
            if body.is_empty() {
                Map::new()
            } else {
                serde_json::from_slice::<Map<String, Value>>(body).map_err(IslandError::MalformedProps)?
            }
        } else {
            let query = request.uri().query().unwrap_or_default();
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(name, value)| (name.into_owned(), Value::from(value.into_owned())))
                .collect()
        };
        IslandRequest::from_wire(self.prefix(), request.uri().path(), fields)
    }
}

fn error_response(err: &IslandError) -> http::Response<Vec<u8>> {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &err.to_record())
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> http::Response<Vec<u8>> {
    let (status, body) = match serde_json::to_vec(body) {
        Ok(body) => (status, body),
        Err(error) => {
            warn!(%error, "failed to serialize island response");
            (StatusCode::INTERNAL_SERVER_ERROR, b"{}".to_vec())
        }
    };
    let mut response = http::Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use isle_app::{AppConfig, AppError, RequestEvent};
    use isle_island::{component, IslandRegistry, IslandResponse, IslandScope};
    use serde_json::json;

    fn endpoint() -> IslandEndpoint {
        let mut registry = IslandRegistry::new();
        registry.register(
            "Greeting",
            component(|scope: IslandScope| async move {
                let name = scope.prop("name").and_then(Value::as_str).unwrap_or("stranger").to_string();
                let url = scope
                    .app()
                    .island()
                    .and_then(|island| island.context.get("url").and_then(|u| u.as_str().map(str::to_string)))
                    .unwrap_or_default();
                Ok::<String, AppError>(format!("<p>Hello {} at {}</p>", name, url))
            }),
        );
        registry.register(
            "Gone",
            component(|scope: IslandScope| async move {
                if let Some(event) = scope.app().request() {
                    event.append_header("cache-control", "no-store");
                }
                Err::<String, _>(AppError::Render(ErrorRecord::new("gone").with_status(410, "Gone")))
            }),
        );
        IslandEndpoint::new(IslandRenderer::new(registry, AppConfig::default()))
    }

    fn body(response: &http::Response<Vec<u8>>) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[tokio::test]
    async fn get_renders_from_query() {
        let request = http::Request::get("/__isle_island/Greeting_abc.json?props=%7B%22name%22%3A%22Ada%22%7D&url=%2Fabout")
            .body(Vec::new())
            .unwrap();
        let response = endpoint().handle(request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], JSON_CONTENT_TYPE);
        let rendered: IslandResponse = serde_json::from_slice(response.body()).unwrap();
        assert!(rendered.html.contains("Hello Ada at /about"));
        assert_eq!(rendered.id.as_deref(), Some("Greeting_abc"));
    }

    #[tokio::test]
    async fn post_renders_from_body() {
        let payload = json!({ "props": "{\"name\":\"Grace\"}", "url": "/team" });
        let request = http::Request::post("/__isle_island/Greeting_def.json")
            .body(serde_json::to_vec(&payload).unwrap())
            .unwrap();
        let response = endpoint().handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body(&response)["html"].as_str().unwrap().contains("Hello Grace at /team"));
    }

    #[tokio::test]
    async fn client_errors() {
        let endpoint = endpoint();
        let cases = [
            ("/__isle_island/Greeting_1.json?props=%7Bnope", StatusCode::BAD_REQUEST),
            ("/__isle_island/Greeting_1", StatusCode::BAD_REQUEST),
            ("/__isle_island/Unknown_1.json", StatusCode::NOT_FOUND),
        ];
        for (uri, status) in cases {
            let response = endpoint.handle(http::Request::get(uri).body(Vec::new()).unwrap()).await;
            assert_eq!(response.status(), status, "{uri}");
            assert_eq!(body(&response)["statusCode"], status.as_u16());
        }

        let response = endpoint
            .handle(http::Request::post("/__isle_island/Greeting_1.json").body(b"[1,".to_vec()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = endpoint
            .handle(http::Request::delete("/__isle_island/Greeting_1.json").body(Vec::new()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn render_errors_keep_their_status() {
        let response = endpoint()
            .handle(http::Request::get("/__isle_island/Gone_1.json").body(Vec::new()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::GONE);
        assert_eq!(body(&response)["message"], "gone");
    }

    #[test]
    fn prefix_matching() {
        let endpoint = endpoint();
        assert!(endpoint.matches("/__isle_island/Card_1.json"));
        assert!(!endpoint.matches("/__isle_islands/Card_1.json"));
        assert!(!endpoint.matches("/about"));
    }
}
