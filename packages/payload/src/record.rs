//! The serializable error shape stored in the payload.

use serde::{Deserialize, Serialize};

/// An error as it travels between server render and client hydration.
///
/// Stored per key in the payload error map and in the global error slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// HTTP-style status code.
    pub status_code: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,

    pub message: String,

    /// Arbitrary extra detail attached by whoever raised the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Fatal errors always show the full error page.
    #[serde(default)]
    pub fatal: bool,

    /// Set when the error was captured rather than raised deliberately.
    #[serde(default)]
    pub unhandled: bool,

    /// Request URL the error happened on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ErrorRecord {
    /// A 500 error carrying `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status_code: 500,
            status_message: None,
            message: message.into(),
            data: None,
            fatal: false,
            unhandled: false,
            url: None,
        }
    }

    /// Capture any error as an unhandled 500.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            unhandled: true,
            ..Self::new(error.to_string())
        }
    }

    pub fn with_status(mut self, status_code: u16, status_message: impl Into<String>) -> Self {
        self.status_code = status_code;
        self.status_message = Some(status_message.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.status_message {
            Some(status) => write!(f, "{} {}: {}", self.status_code, status, self.message),
            None => write!(f, "{}: {}", self.status_code, self.message),
        }
    }
}

impl std::error::Error for ErrorRecord {}
