//! Keyed async data fetching.
//!
//! Results land in the payload under their key, so a fetch done on the
//! server is reused during hydration instead of running again. Fetch errors
//! are stored next to the data and never raised to the caller.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use isle_payload::{ClearKeys, ErrorRecord, FetchResult, Value};
use tracing::{debug, warn};

use crate::app::{App, WeakApp};
use crate::error::Result;
use crate::hooks::{HookArgs, HookHandle, APP_DATA_REFRESH};

/// What to do when a fetch for the same key is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupeStrategy {
    /// Supersede the running fetch; its result is discarded.
    #[default]
    Cancel,
    /// Wait for the running fetch instead of starting another.
    Defer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub dedupe: DedupeStrategy,
    /// Reported as `data` while the key holds nothing.
    pub default: Option<Value>,
    /// Whether to fetch during server render.
    pub server: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            dedupe: DedupeStrategy::Cancel,
            default: None,
            server: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStatus {
    Idle,
    Pending,
    Success,
    Error,
}

/// A snapshot of one keyed fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncData {
    pub key: String,
    pub data: Value,
    pub error: Option<ErrorRecord>,
    pub status: AsyncStatus,
}

/// A boxed fetcher.
pub type Fetcher = Arc<dyn Fn(App) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

pub fn fetcher<F, Fut>(f: F) -> Fetcher
where
    F: Fn(App) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |app| f(app).boxed())
}

/// Read the current state of `key` without fetching.
pub fn snapshot(app: &App, key: &str, default: Option<&Value>) -> AsyncData {
    let payload = app.payload();
    let stored = payload.get(key);
    let error = payload.error_for(key);
    let status = if error.is_some() {
        AsyncStatus::Error
    } else if payload.pending(key).is_some() {
        AsyncStatus::Pending
    } else if stored.is_some() {
        AsyncStatus::Success
    } else {
        AsyncStatus::Idle
    };
    let data = match stored {
        Some(value) if !value.is_null() => value,
        _ => default.cloned().unwrap_or_default(),
    };
    AsyncData {
        key: key.to_string(),
        data,
        error,
        status,
    }
}

/// Fetch `key` once, reusing hydrated data when available.
pub async fn fetch_data(app: &App, key: &str, fetcher: &Fetcher, options: &FetchOptions) -> AsyncData {
    let payload = app.payload();
    if app.is_hydrating() && (payload.has(key) || payload.error_for(key).is_some()) {
        debug!(key, "reusing hydrated data");
        return snapshot(app, key, options.default.as_ref());
    }
    if app.is_server() && !options.server {
        return snapshot(app, key, options.default.as_ref());
    }
    run_fetch(app, key, fetcher, options).await
}

async fn run_fetch(app: &App, key: &str, fetcher: &Fetcher, options: &FetchOptions) -> AsyncData {
    let payload = app.payload();
    if options.dedupe == DedupeStrategy::Defer {
        if let Some((_, running)) = payload.pending(key) {
            debug!(key, "joining running fetch");
            let _ = running.await;
            return snapshot(app, key, options.default.as_ref());
        }
    }

    let run: BoxFuture<'static, FetchResult> = {
        let app = app.clone();
        let fut = fetcher(app.clone());
        async move {
            app.run_with_context(fut)
                .await
                .map_err(|err| err.to_record())
        }
        .boxed()
    };
    let (token, shared) = payload.begin_pending(key, run);
    let result = shared.await;
    if let Err(record) = &result {
        warn!(key, error = %record, "fetch failed");
    }
    if !payload.finish_pending(key, token, result) {
        debug!(key, "discarding superseded fetch");
    }
    snapshot(app, key, options.default.as_ref())
}

/// A keyed fetch that re-runs on `app:data:refresh`.
pub struct AsyncDataHandle {
    app: App,
    key: String,
    fetcher: Fetcher,
    options: FetchOptions,
    refresh_hook: Option<HookHandle>,
}

/// Fetch `key` and keep it refreshable.
pub async fn use_async_data(app: &App, key: &str, fetcher: Fetcher, options: FetchOptions) -> AsyncDataHandle {
    let weak: WeakApp = app.downgrade();
    let hook_key = key.to_string();
    let hook_fetcher = fetcher.clone();
    let hook_options = options.clone();
    let refresh_hook = app.hooks().hook(APP_DATA_REFRESH, move |args| {
        let app = weak.upgrade();
        let key = hook_key.clone();
        let fetcher = hook_fetcher.clone();
        let options = hook_options.clone();
        async move {
            let Some(app) = app else {
                return Ok(());
            };
            let wanted = match &args {
                HookArgs::Refresh(Some(keys)) => keys.iter().any(|k| *k == key),
                _ => true,
            };
            if wanted {
                run_fetch(&app, &key, &fetcher, &options).await;
            }
            Ok::<(), crate::error::AppError>(())
        }
    });

    fetch_data(app, key, &fetcher, &options).await;
    AsyncDataHandle {
        app: app.clone(),
        key: key.to_string(),
        fetcher,
        options,
        refresh_hook: Some(refresh_hook),
    }
}

impl AsyncDataHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> AsyncData {
        snapshot(&self.app, &self.key, self.options.default.as_ref())
    }

    /// Fetch again, regardless of hydration.
    pub async fn refresh(&self) -> AsyncData {
        run_fetch(&self.app, &self.key, &self.fetcher, &self.options).await
    }

    pub fn clear(&self) {
        self.app.payload().clear(vec![self.key.clone()]);
    }
}

impl Drop for AsyncDataHandle {
    fn drop(&mut self) {
        if let Some(hook) = self.refresh_hook.take() {
            hook.unregister();
        }
    }
}

/// Re-run every live fetch for `keys`, or all of them.
pub async fn refresh_data(app: &App, keys: Option<&[&str]>) -> Result<()> {
    let keys = keys.map(|keys| keys.iter().map(|k| k.to_string()).collect());
    app.call_hook(APP_DATA_REFRESH, HookArgs::Refresh(keys)).await
}

/// Null out stored data and errors and drop in-flight fetches.
pub fn clear_data<'a>(app: &App, keys: impl Into<ClearKeys<'a>>) -> Vec<String> {
    let cleared = app.payload().clear(keys);
    debug!(count = cleared.len(), "cleared async data");
    cleared
}
