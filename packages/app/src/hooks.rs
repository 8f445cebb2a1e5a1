//! Named async hooks.
//!
//! Callbacks for one hook run one after another in registration order.
//! Dispatch works over a snapshot taken when it starts, so callbacks
//! registered during a dispatch wait for the next one. A failing callback
//! does not stop the rest; the first error is returned once all have run.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::future::{BoxFuture, FutureExt};
use isle_payload::{ErrorRecord, Value};
use tracing::warn;

use crate::error::Result;

pub const APP_CREATED: &str = "app:created";
pub const APP_BEFORE_MOUNT: &str = "app:beforeMount";
pub const APP_MOUNTED: &str = "app:mounted";
pub const APP_RENDERED: &str = "app:rendered";
pub const APP_ERROR: &str = "app:error";
pub const APP_ERROR_CLEARED: &str = "app:error:cleared";
pub const APP_SUSPENSE_RESOLVE: &str = "app:suspense:resolve";
pub const APP_DATA_REFRESH: &str = "app:data:refresh";
pub const APP_CHUNK_ERROR: &str = "app:chunkError";
pub const ISLAND_RENDERED: &str = "island:rendered";
pub const DEV_SSR_LOGS: &str = "dev:ssr-logs";

/// Shared view of a finished server render that late collaborators may
/// still add head tags to.
#[derive(Debug, Clone, Default)]
pub struct RenderedContext {
    pub html: String,
    head: Arc<Mutex<Vec<String>>>,
}

impl RenderedContext {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            head: Arc::default(),
        }
    }

    pub fn push_head(&self, tag: impl Into<String>) {
        self.head
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(tag.into());
    }

    pub fn head(&self) -> Vec<String> {
        self.head.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Arguments handed to hook callbacks.
#[derive(Debug, Clone)]
pub enum HookArgs {
    Empty,
    Error(ErrorRecord),
    ErrorCleared { redirect: Option<String> },
    Rendered(RenderedContext),
    /// Data keys to refresh; `None` means all.
    Refresh(Option<Vec<String>>),
    ChunkError { chunk: String, error: ErrorRecord },
    Value(Value),
}

/// A boxed hook callback.
pub type HookFn = Arc<dyn Fn(HookArgs) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Box a closure into a [`HookFn`].
pub fn hook_fn<F, Fut>(f: F) -> HookFn
where
    F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

struct Entry {
    id: u64,
    once: bool,
    callback: HookFn,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    hooks: HashMap<String, Vec<Entry>>,
}

/// Unregisters a callback. Dropping the handle keeps the callback.
#[derive(Debug)]
pub struct HookHandle {
    registry: Weak<Mutex<Registry>>,
    name: String,
    id: u64,
}

impl HookHandle {
    /// Remove the callback. Returns false if it was already gone.
    pub fn unregister(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => remove(&registry, &self.name, self.id),
            None => false,
        }
    }
}

/// The per-application hook registry.
#[derive(Clone, Default)]
pub struct HookBus {
    registry: Arc<Mutex<Registry>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|p| p.into_inner())
}

fn remove(registry: &Mutex<Registry>, name: &str, id: u64) -> bool {
    let mut registry = lock(registry);
    let Some(entries) = registry.hooks.get_mut(name) else {
        return false;
    };
    let before = entries.len();
    entries.retain(|e| e.id != id);
    before != entries.len()
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, name: &str, callback: HookFn, once: bool) -> HookHandle {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .hooks
            .entry(name.to_string())
            .or_default()
            .push(Entry { id, once, callback });
        HookHandle {
            registry: Arc::downgrade(&self.registry),
            name: name.to_string(),
            id,
        }
    }

    pub fn hook_boxed(&self, name: &str, callback: HookFn) -> HookHandle {
        self.register(name, callback, false)
    }

    pub fn hook<F, Fut>(&self, name: &str, f: F) -> HookHandle
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(name, hook_fn(f), false)
    }

    /// Register a callback that runs on the next dispatch only.
    pub fn hook_once<F, Fut>(&self, name: &str, f: F) -> HookHandle
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(name, hook_fn(f), true)
    }

    /// Number of callbacks registered for `name`.
    pub fn count(&self, name: &str) -> usize {
        lock(&self.registry).hooks.get(name).map_or(0, Vec::len)
    }

    pub async fn call_hook(&self, name: &str, args: HookArgs) -> Result<()> {
        self.call_hook_with(name, args, |fut| fut).await
    }

    /// Dispatch `name`, passing every callback future through `caller`.
    pub async fn call_hook_with<C>(&self, name: &str, args: HookArgs, caller: C) -> Result<()>
    where
        C: Fn(BoxFuture<'static, Result<()>>) -> BoxFuture<'static, Result<()>>,
    {
        let snapshot: Vec<HookFn> = {
            let mut registry = lock(&self.registry);
            match registry.hooks.get_mut(name) {
                Some(entries) => {
                    let callbacks = entries.iter().map(|e| e.callback.clone()).collect();
                    entries.retain(|e| !e.once);
                    callbacks
                }
                None => return Ok(()),
            }
        };

        let mut first_error = None;
        for callback in snapshot {
            if let Err(error) = caller(callback(args.clone())).await {
                warn!(hook = name, %error, "hook callback failed");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for HookBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        let mut names: Vec<_> = registry
            .hooks
            .iter()
            .map(|(name, entries)| (name.clone(), entries.len()))
            .collect();
        names.sort();
        f.debug_struct("HookBus").field("hooks", &names).finish()
    }
}
