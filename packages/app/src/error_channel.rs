//! The application error channel.
//!
//! One global error slot lives in the payload. Setting it switches the page
//! to the error view; clearing it switches back. Component subtrees can opt
//! out of escalation with an [`ErrorBoundary`].

use std::sync::atomic::{AtomicBool, Ordering};

use isle_payload::{from_value, to_value, ErrorRecord, Value};
use tracing::{error, warn};

use crate::app::App;
use crate::error::{AppError, Result};
use crate::hooks::{HookArgs, APP_ERROR, APP_ERROR_CLEARED};

/// Report an error raised anywhere in the app.
///
/// Fires `app:error`, then fills the global error slot unless an earlier
/// error already holds it. Returns the stored record.
pub async fn handle_error(app: &App, err: &AppError) -> ErrorRecord {
    let mut record = err.to_record();
    if record.url.is_none() {
        if let Some(request) = app.request() {
            record.url = Some(request.path());
        }
    }
    error!(app_id = %app.id(), status = record.status_code, %err, "application error");

    if let Err(hook_error) = app.call_hook(APP_ERROR, HookArgs::Error(record.clone())).await {
        warn!(app_id = %app.id(), error = %hook_error, "app:error hook failed");
    }
    if app.payload().global_error().is_none() {
        app.payload().set_global_error(Some(record.clone()));
    }
    record
}

/// Show the error page for `record`, replacing whatever error is current.
pub fn show_error(app: &App, record: ErrorRecord) -> ErrorRecord {
    if let Some(request) = app.request() {
        request.set_status(record.status_code, record.status_message.as_deref());
    }
    app.payload().set_global_error(Some(record.clone()));
    record
}

pub fn current_error(app: &App) -> Option<ErrorRecord> {
    app.payload().global_error()
}

/// Clear the global error, optionally asking the router to navigate.
///
/// `app:error:cleared` fires before the slot is emptied; a failing callback
/// leaves the error in place.
pub async fn clear_error(app: &App, redirect: Option<&str>) -> Result<()> {
    app.call_hook(
        APP_ERROR_CLEARED,
        HookArgs::ErrorCleared {
            redirect: redirect.map(str::to_string),
        },
    )
    .await?;
    app.payload().set_global_error(None);
    Ok(())
}

/// What a boundary tells the caller after capturing an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// The boundary handled it; do not escalate.
    Stop,
    Continue,
}

const BOUNDARY_PREFIX: &str = "error-boundary:";

/// A keyed error boundary around one component subtree.
///
/// The captured error lives in payload state, so a boundary that captured on
/// the server shows the same fallback after hydration.
pub struct ErrorBoundary {
    app: App,
    slot: String,
    captured: AtomicBool,
}

impl ErrorBoundary {
    pub fn new(app: &App, key: &str) -> Self {
        let slot = format!("{}{}", BOUNDARY_PREFIX, key);
        let captured = app
            .payload()
            .state(&slot)
            .is_some_and(|value| !value.is_null());
        Self {
            app: app.clone(),
            slot,
            captured: AtomicBool::new(captured),
        }
    }

    /// Capture an error raised inside the subtree.
    pub fn capture(&self, err: &AppError) -> Propagation {
        let record = err.to_record();
        warn!(app_id = %self.app.id(), boundary = %self.slot, %err, "error captured by boundary");
        match to_value(&record) {
            Ok(value) => {
                self.app.payload().set_state(&self.slot, value);
                self.captured.store(true, Ordering::SeqCst);
                Propagation::Stop
            }
            Err(encode_error) => {
                warn!(error = %encode_error, "boundary could not store error; escalating");
                Propagation::Continue
            }
        }
    }

    pub fn has_error(&self) -> bool {
        self.captured.load(Ordering::SeqCst)
    }

    pub fn error(&self) -> Option<ErrorRecord> {
        let value = self.app.payload().state(&self.slot)?;
        if value.is_null() {
            return None;
        }
        from_value(value).ok()
    }

    /// Drop the captured error so the subtree renders again.
    pub fn reset(&self) {
        self.app.payload().set_state(&self.slot, Value::Null);
        self.captured.store(false, Ordering::SeqCst);
    }
}
