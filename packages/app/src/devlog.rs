//! Server log entries forwarded to the client in development.
//!
//! During a dev server render, entries recorded on the app travel to the
//! client inside the payload state. The client emits each one once, skipping
//! anything it already logged itself.

use std::collections::HashSet;
use std::sync::Mutex;

use isle_payload::{from_value, to_value, PayloadStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// State key the forwarded entries travel under.
pub const LOGS_STATE_KEY: &str = "__isle_logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            source: None,
        }
    }

    fn emit(&self) {
        let source = self.source.as_deref().unwrap_or("ssr");
        match self.level {
            LogLevel::Debug => debug!(target: "isle::ssr", source, "{}", self.message),
            LogLevel::Info => info!(target: "isle::ssr", source, "{}", self.message),
            LogLevel::Warn => warn!(target: "isle::ssr", source, "{}", self.message),
            LogLevel::Error => error!(target: "isle::ssr", source, "{}", self.message),
        }
    }
}

/// Log entries recorded on one app plus what the client already emitted.
#[derive(Debug, Default)]
pub struct DevLogs {
    entries: Mutex<Vec<LogEntry>>,
    emitted: Mutex<HashSet<LogEntry>>,
}

impl DevLogs {
    pub fn record(&self, entry: LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(entry);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Server side: move recorded entries into the payload.
    pub fn attach(&self, payload: &PayloadStore) -> isle_payload::Result<()> {
        let entries = std::mem::take(&mut *self.entries.lock().unwrap_or_else(|p| p.into_inner()));
        if entries.is_empty() {
            return Ok(());
        }
        payload.set_state(LOGS_STATE_KEY, to_value(&entries)?);
        Ok(())
    }

    /// Client side: note an entry the client logged on its own.
    pub fn note_emitted(&self, entry: LogEntry) {
        self.emitted
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(entry);
    }

    /// Client side: emit forwarded server entries not seen before.
    ///
    /// Returns the entries actually emitted.
    pub fn forward(&self, payload: &PayloadStore) -> isle_payload::Result<Vec<LogEntry>> {
        let Some(value) = payload.remove_state(LOGS_STATE_KEY) else {
            return Ok(Vec::new());
        };
        let entries: Vec<LogEntry> = from_value(value)?;
        let mut emitted = self.emitted.lock().unwrap_or_else(|p| p.into_inner());
        let mut forwarded = Vec::new();
        for entry in entries {
            if emitted.insert(entry.clone()) {
                entry.emit();
                forwarded.push(entry);
            }
        }
        Ok(forwarded)
    }
}
