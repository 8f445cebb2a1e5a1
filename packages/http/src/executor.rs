//! HTTP execution abstraction.
//!
//! Island fetchers talk to the network through [`HttpExecutor`] so tests can
//! swap in canned responses instead of real calls.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use tracing::debug;

use crate::error::Result;
use crate::types::{HttpRequest, HttpResponse};

/// Executes HTTP requests.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Execute a request. Non-2xx statuses are responses, not errors.
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Production HTTP executor using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: Client,
}

impl ReqwestExecutor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Create with default timeout of 30 seconds.
    pub fn with_default_timeout() -> Result<Self> {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method: http::Method = request.method.into();

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            headers.insert(HeaderName::try_from(name.as_str())?, HeaderValue::try_from(value.as_str())?);
        }

        let mut builder = self.client.request(method, &request.url).headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = ?request.method, url = %request.url, "http request");
        let response = builder.send().await?;

        let status = response.status();
        let mut resp_headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                resp_headers.insert(name.as_str().to_string(), v.to_string());
            }
        }

        let body_text = response.text().await?;
        let body = serde_json::from_str(&body_text).unwrap_or(serde_json::Value::Null);

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
            headers: resp_headers,
            body,
            body_text: Some(body_text),
        })
    }
}

/// Canned-response executor for tests.
#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct MockExecutor {
        /// Responses keyed by URL, without the query.
        responses: Arc<Mutex<HashMap<String, HttpResponse>>>,
        recorded_requests: Arc<Mutex<Vec<HttpRequest>>>,
        failure: Arc<Mutex<Option<String>>>,
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_response(self, url: impl Into<String>, response: HttpResponse) -> Self {
            self.responses.lock().unwrap().insert(url.into(), response);
            self
        }

        /// Fail every request as if the connection broke.
        pub fn fail_with(self, message: impl Into<String>) -> Self {
            *self.failure.lock().unwrap() = Some(message.into());
            self
        }

        pub fn recorded_requests(&self) -> Vec<HttpRequest> {
            self.recorded_requests.lock().unwrap().clone()
        }

        pub fn error_response(status: u16, message: &str) -> HttpResponse {
            HttpResponse {
                status,
                status_text: message.to_string(),
                headers: BTreeMap::new(),
                body: serde_json::json!({ "statusCode": status, "message": message }),
                body_text: None,
            }
        }
    }

    #[async_trait]
    impl HttpExecutor for MockExecutor {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
            self.recorded_requests.lock().unwrap().push(request.clone());

            if let Some(message) = self.failure.lock().unwrap().clone() {
                return Err(Error::Status { status: 0, message });
            }

            let responses = self.responses.lock().unwrap();
            Ok(responses
                .get(&request.url)
                .cloned()
                .unwrap_or_else(|| Self::error_response(404, "Not Found")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockExecutor;
    use super::*;
    use crate::types::Method;

    #[tokio::test]
    async fn mock_executor_returns_configured_response() {
        let executor = MockExecutor::new()
            .with_response("/test", HttpResponse::json_ok(serde_json::json!({ "result": "success" })));

        let result = executor.execute(&HttpRequest::get("/test")).await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(result.body, serde_json::json!({ "result": "success" }));

        let missing = executor.execute(&HttpRequest::get("/unknown")).await.unwrap();
        assert_eq!(missing.status, 404);
    }

    #[tokio::test]
    async fn mock_executor_fails_when_configured() {
        let executor = MockExecutor::new().fail_with("Network error");
        let err = executor.execute(&HttpRequest::get("/any")).await.unwrap_err();
        assert!(err.to_string().contains("Network error"));
    }

    #[tokio::test]
    async fn mock_executor_records_requests() {
        let executor = MockExecutor::new();
        executor.execute(&HttpRequest::get("/first")).await.unwrap();
        executor
            .execute(&HttpRequest::post("/second").with_json_body(serde_json::json!({ "name": "test" })))
            .await
            .unwrap();

        let recorded = executor.recorded_requests();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].method, Method::GET);
        assert_eq!(recorded[1].method, Method::POST);
        assert_eq!(recorded[1].body, Some(serde_json::json!({ "name": "test" })));
    }

    #[test]
    fn reqwest_executor_creation() {
        assert!(ReqwestExecutor::with_default_timeout().is_ok());
        assert!(ReqwestExecutor::new(Duration::from_secs(10)).is_ok());
    }
}
