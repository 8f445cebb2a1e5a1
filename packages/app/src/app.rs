//! The application instance.
//!
//! One `App` exists per server request and one per client page load. It
//! exclusively owns the payload store and the hook bus, and carries the
//! late-bound services plugins provide, plus any per-app caches other crates
//! need (see [`App::scoped`]).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::future::{BoxFuture, FutureExt};
use isle_payload::{ErrorRecord, PayloadCodec, PayloadStore, Value};
use tokio::sync::watch;
use tracing::debug;

use crate::config::AppConfig;
use crate::context;
use crate::devlog::DevLogs;
use crate::error::Result;
use crate::hooks::{HookArgs, HookBus};
use crate::hydration::{HydrationGate, HydrationRelease};
use crate::lifecycle::LifecycleState;
use crate::request::RequestEvent;

/// Which side of the wire an app runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Server,
    Client,
}

/// Identity of an island render: the narrower app created for one
/// component subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct IslandContext {
    /// Hash key of the island.
    pub id: String,
    pub name: String,
    pub props: Value,
    /// Route context passed along with the request.
    pub context: Value,
}

type AnyArc = Arc<dyn Any + Send + Sync>;

struct AppInner {
    id: String,
    platform: Platform,
    config: AppConfig,
    payload: PayloadStore,
    codec: PayloadCodec,
    hooks: HookBus,
    provides: Mutex<HashMap<String, AnyArc>>,
    scoped: Mutex<HashMap<TypeId, AnyArc>>,
    hydration: Arc<HydrationGate>,
    state: watch::Sender<LifecycleState>,
    request: Option<Arc<dyn RequestEvent>>,
    island: Option<IslandContext>,
    dev_logs: DevLogs,
}

/// A cheaply clonable handle to one application instance.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

/// Builds an [`App`].
pub struct AppBuilder {
    platform: Platform,
    config: AppConfig,
    payload: Option<isle_payload::Payload>,
    codec: PayloadCodec,
    request: Option<Arc<dyn RequestEvent>>,
    island: Option<IslandContext>,
}

impl AppBuilder {
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed the payload store (client hydration).
    pub fn payload(mut self, payload: isle_payload::Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn codec(mut self, codec: PayloadCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn request(mut self, request: Arc<dyn RequestEvent>) -> Self {
        self.request = Some(request);
        self
    }

    pub fn island(mut self, island: IslandContext) -> Self {
        self.island = Some(island);
        self
    }

    pub fn build(self) -> App {
        let payload = match self.payload {
            Some(payload) => PayloadStore::from_payload(payload),
            None => PayloadStore::new(),
        };
        let public = isle_payload::convert::json_to_value(self.config.public.clone());
        payload.set_config(public);

        let (state, _) = watch::channel(LifecycleState::Uninitialized);
        debug!(app_id = %self.config.app_id, platform = ?self.platform, "app created");
        App {
            inner: Arc::new(AppInner {
                id: self.config.app_id.clone(),
                platform: self.platform,
                config: self.config,
                payload,
                codec: self.codec,
                hooks: HookBus::new(),
                provides: Mutex::default(),
                scoped: Mutex::default(),
                hydration: Arc::new(HydrationGate::new()),
                state,
                request: self.request,
                island: self.island,
                dev_logs: DevLogs::default(),
            }),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

impl App {
    pub fn builder(platform: Platform) -> AppBuilder {
        AppBuilder {
            platform,
            config: AppConfig::default(),
            payload: None,
            codec: PayloadCodec::new(),
            request: None,
            island: None,
        }
    }

    pub fn server(config: AppConfig) -> Self {
        Self::builder(Platform::Server).config(config).build()
    }

    pub fn client(config: AppConfig) -> Self {
        Self::builder(Platform::Client).config(config).build()
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn platform(&self) -> Platform {
        self.inner.platform
    }

    pub fn is_server(&self) -> bool {
        self.inner.platform == Platform::Server
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn payload(&self) -> &PayloadStore {
        &self.inner.payload
    }

    pub fn codec(&self) -> &PayloadCodec {
        &self.inner.codec
    }

    pub fn hooks(&self) -> &HookBus {
        &self.inner.hooks
    }

    pub fn request(&self) -> Option<&Arc<dyn RequestEvent>> {
        self.inner.request.as_ref()
    }

    pub fn island(&self) -> Option<&IslandContext> {
        self.inner.island.as_ref()
    }

    pub fn dev_logs(&self) -> &DevLogs {
        &self.inner.dev_logs
    }

    /// Whether two handles refer to the same instance.
    pub fn ptr_eq(&self, other: &App) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// A handle that does not keep the app alive. Callbacks stored on the
    /// app itself hold one of these.
    pub fn downgrade(&self) -> WeakApp {
        WeakApp(Arc::downgrade(&self.inner))
    }

    // -- provide / inject ---------------------------------------------------

    /// Make `value` injectable under `name`. Later provides win.
    pub fn provide<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) {
        self.provide_arc(name, Arc::new(value));
    }

    pub fn provide_arc(&self, name: impl Into<String>, value: AnyArc) {
        let name = name.into();
        debug!(app_id = %self.id(), provide = %name, "provide");
        lock(&self.inner.provides).insert(name, value);
    }

    /// Look up a provided value by name and type.
    pub fn inject<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let value = lock(&self.inner.provides).get(name).cloned()?;
        value.downcast::<T>().ok()
    }

    /// A per-app instance of `T`, created on first use.
    ///
    /// Caches that must not leak between requests live here.
    pub fn scoped<T: Default + Send + Sync + 'static>(&self) -> Arc<T> {
        let mut scoped = lock(&self.inner.scoped);
        let entry = scoped
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(T::default()) as AnyArc)
            .clone();
        drop(scoped);
        match entry.downcast::<T>() {
            Ok(value) => value,
            // Keyed by TypeId, so the downcast cannot fail.
            Err(_) => Arc::new(T::default()),
        }
    }

    // -- context ------------------------------------------------------------

    /// Run `fut` with this app as the current context.
    pub async fn run_with_context<F>(&self, fut: F) -> F::Output
    where
        F: Future + Send,
    {
        context::run_with_context(self, fut).await
    }

    /// Dispatch a hook. On the server every callback runs inside this app's
    /// context.
    pub async fn call_hook(&self, name: &str, args: HookArgs) -> Result<()> {
        if self.is_server() {
            let app = self.clone();
            self.inner
                .hooks
                .call_hook_with(name, args, move |fut| {
                    let app = app.clone();
                    async move { app.run_with_context(fut).await }.boxed()
                })
                .await
        } else {
            self.inner.hooks.call_hook(name, args).await
        }
    }

    /// Run `f` at most once per payload, inside this app's context.
    pub async fn call_once<F, Fut>(&self, key: &str, f: F) -> std::result::Result<(), ErrorRecord>
    where
        F: FnOnce(App) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let app = self.clone();
        self.inner
            .payload
            .call_once(key, move || {
                let scoped = app.clone();
                let fut = f(app);
                async move {
                    scoped
                        .run_with_context(fut)
                        .await
                        .map_err(|e| e.to_record())
                }
            })
            .await
    }

    // -- hydration and lifecycle --------------------------------------------

    pub fn is_hydrating(&self) -> bool {
        self.inner.hydration.is_hydrating()
    }

    pub(crate) fn hydration(&self) -> &Arc<HydrationGate> {
        &self.inner.hydration
    }

    /// Hold hydration open until the returned release is called or dropped.
    ///
    /// Outside of hydration the release is a no-op.
    pub fn defer_hydration(&self) -> HydrationRelease {
        HydrationGate::defer(&self.inner.hydration)
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    pub(crate) fn set_lifecycle_state(&self, state: LifecycleState) {
        let previous = self.inner.state.send_replace(state);
        debug!(app_id = %self.id(), from = ?previous, to = ?state, "lifecycle");
    }

    /// Wait until the app reaches `state` (or already has).
    pub async fn wait_for_state(&self, state: LifecycleState) {
        let mut rx = self.inner.state.subscribe();
        // The sender lives as long as self, so this cannot fail.
        let _ = rx.wait_for(|current| *current == state).await;
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("id", &self.inner.id)
            .field("platform", &self.inner.platform)
            .field("state", &self.lifecycle_state())
            .field("island", &self.inner.island.as_ref().map(|i| &i.id))
            .finish()
    }
}

/// Non-owning [`App`] handle.
#[derive(Clone)]
pub struct WeakApp(Weak<AppInner>);

impl WeakApp {
    pub fn upgrade(&self) -> Option<App> {
        self.0.upgrade().map(|inner| App { inner })
    }
}

/// Boxed plugin/fetcher style future, used at crate seams.
pub type AppFuture<T> = BoxFuture<'static, Result<T>>;
