//! Client-side island fetching over HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use isle_island::{IslandFetcher, IslandRequest, IslandResponse};
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};
use crate::executor::{HttpExecutor, ReqwestExecutor};
use crate::types::{HttpRequest, Method};

/// Fetches islands from a wire endpoint.
#[derive(Clone)]
pub struct HttpIslandFetcher {
    executor: Arc<dyn HttpExecutor>,
    base_url: Url,
    method: Method,
}

impl HttpIslandFetcher {
    /// Relative island paths resolve against `base_url`.
    pub fn new(executor: Arc<dyn HttpExecutor>, base_url: &str) -> Result<Self> {
        Ok(Self {
            executor,
            base_url: Url::parse(base_url)?,
            method: Method::GET,
        })
    }

    pub fn reqwest(base_url: &str, timeout: Duration) -> Result<Self> {
        Self::new(Arc::new(ReqwestExecutor::new(timeout)?), base_url)
    }

    /// Send the context as a JSON body instead of the query string.
    pub fn with_post(mut self) -> Self {
        self.method = Method::POST;
        self
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        match Url::parse(path) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(self.base_url.join(path)?),
            Err(err) => Err(err.into()),
        }
    }

    fn build(&self, url: Url, request: &IslandRequest) -> HttpRequest {
        let http_request = match self.method {
            Method::GET => request
                .query_pairs()
                .into_iter()
                .fold(HttpRequest::get(url.as_str()), |req, (name, value)| req.with_query(name, value)),
            Method::POST => HttpRequest::post(url.as_str()).with_json_body(Value::Object(request.wire_fields())),
        };
        http_request.with_header("accept", "application/json")
    }
}

#[async_trait]
impl IslandFetcher for HttpIslandFetcher {
    async fn fetch(&self, path: &str, request: &IslandRequest) -> isle_island::Result<IslandResponse> {
        let url = self.resolve(path)?;
        let response = self.executor.execute(&self.build(url, request)).await?;
        if !response.is_success() {
            let message = response
                .body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or(&response.status_text)
                .to_string();
            return Err(Error::Status {
                status: response.status,
                message,
            }
            .into());
        }
        Ok(response.json::<IslandResponse>()?)
    }
}

impl std::fmt::Debug for HttpIslandFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIslandFetcher")
            .field("base_url", &self.base_url.as_str())
            .field("method", &self.method)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::mock::MockExecutor;
    use crate::types::HttpResponse;
    use isle_island::IslandError;
    use serde_json::json;

    fn request() -> IslandRequest {
        IslandRequest::new("Card", json!({ "id": 3 }))
    }

    #[tokio::test]
    async fn get_sends_double_encoded_props() {
        let executor = MockExecutor::new().with_response(
            "https://shop.example/__isle_island/Card_1.json",
            HttpResponse::json_ok(json!({ "html": "<p>3</p>" })),
        );
        let fetcher = HttpIslandFetcher::new(Arc::new(executor.clone()), "https://shop.example/").unwrap();

        let response = fetcher.fetch("/__isle_island/Card_1.json", &request()).await.unwrap();
        assert_eq!(response.html, "<p>3</p>");

        let sent = &executor.recorded_requests()[0];
        assert_eq!(sent.method, Method::GET);
        assert_eq!(sent.query["props"], r#"{"id":3}"#);
        assert_eq!(sent.query["url"], "/");
        assert_eq!(sent.headers["accept"], "application/json");
    }

    #[tokio::test]
    async fn post_and_absolute_paths() {
        let executor = MockExecutor::new().with_response(
            "https://remote.example/__isle_island/Card_1.json",
            HttpResponse::json_ok(json!({ "html": "<p>remote</p>" })),
        );
        let fetcher = HttpIslandFetcher::new(Arc::new(executor.clone()), "https://shop.example")
            .unwrap()
            .with_post();

        fetcher
            .fetch("https://remote.example/__isle_island/Card_1.json", &request())
            .await
            .unwrap();
        let sent = &executor.recorded_requests()[0];
        assert_eq!(sent.method, Method::POST);
        assert_eq!(sent.body, Some(json!({ "props": r#"{"id":3}"#, "url": "/" })));
    }

    #[tokio::test]
    async fn failures_become_fetch_errors() {
        let fetcher = HttpIslandFetcher::new(Arc::new(MockExecutor::new()), "https://shop.example").unwrap();
        let err = fetcher.fetch("/__isle_island/Card_1.json", &request()).await.unwrap_err();
        assert!(matches!(err, IslandError::Fetch { .. }));
        assert!(err.to_string().contains("404"));

        let broken = HttpIslandFetcher::new(Arc::new(MockExecutor::new().fail_with("reset")), "https://shop.example")
            .unwrap();
        let err = broken.fetch("/__isle_island/Card_1.json", &request()).await.unwrap_err();
        assert!(err.to_string().contains("reset"));
    }
}
