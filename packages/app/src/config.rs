//! Runtime configuration carried by every application.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for one application instance.
///
/// Loading and merging config files is the caller's business; this is the
/// resolved result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Instance id; distinguishes co-located apps on one page.
    pub app_id: String,
    /// Whether several apps share a page.
    pub multi_app: bool,
    /// URL prefix of the island wire endpoint.
    pub island_prefix: String,
    /// How long island prop changes settle before a re-fetch.
    pub island_debounce_ms: u64,
    /// Force-release hydration gates after this long, if set.
    pub hydration_timeout_ms: Option<u64>,
    /// Load and mount client components inside islands.
    pub selective_client: bool,
    /// Development mode (forwards server logs to the client).
    pub dev: bool,
    /// Public runtime config exposed to the client through the payload.
    pub public: serde_json::Value,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_id: "isle".to_string(),
            multi_app: false,
            island_prefix: "/__isle_island".to_string(),
            island_debounce_ms: 100,
            hydration_timeout_ms: None,
            selective_client: false,
            dev: false,
            public: serde_json::Value::Object(Default::default()),
        }
    }
}

impl AppConfig {
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn island_debounce(&self) -> Duration {
        Duration::from_millis(self.island_debounce_ms)
    }

    pub fn hydration_timeout(&self) -> Option<Duration> {
        self.hydration_timeout_ms.map(Duration::from_millis)
    }
}
