//! Client-side islands.
//!
//! A [`ClientIsland`] adopts server-rendered markup while the page hydrates
//! and otherwise loads its HTML from the payload cache or the wire endpoint.
//! Concurrent loads of one island key share a single request through a map
//! owned by the app, and code-split chunks load once per app.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use isle_app::hooks::APP_CHUNK_ERROR;
use isle_app::{App, HookArgs};
use isle_payload::ErrorRecord;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::key;
use crate::marker::{self, TeleportKey};
use crate::response::{ClientComponentRef, IslandHead, IslandRequest, IslandResponse, SlotResponse};

/// Fetches island responses from the wire endpoint.
#[async_trait]
pub trait IslandFetcher: Send + Sync {
    /// `path` is the endpoint path (prefixed with the remote source, if
    /// any); `request` carries the props and context to send.
    async fn fetch(&self, path: &str, request: &IslandRequest) -> Result<IslandResponse>;
}

/// Loads and mounts client components referenced by islands.
#[async_trait]
pub trait ChunkLoader: Send + Sync {
    async fn load(&self, chunk: &str) -> isle_app::Result<()>;

    /// Mount component `id` at the element matching `selector`.
    async fn mount(&self, id: &str, selector: &str, component: &ClientComponentRef) -> isle_app::Result<()>;
}

type FetchOutcome = std::result::Result<IslandResponse, ErrorRecord>;
type ChunkOutcome = std::result::Result<(), ErrorRecord>;

/// Per-app island caches.
#[derive(Default)]
struct IslandCaches {
    in_flight: Mutex<HashMap<String, Shared<BoxFuture<'static, FetchOutcome>>>>,
    chunks: Mutex<HashMap<String, Shared<BoxFuture<'static, ChunkOutcome>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// What a client island currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IslandView {
    /// Island key of the last load.
    pub key: String,
    pub uid: Option<String>,
    /// Static HTML as received.
    pub html: String,
    /// Bumped on every applied response; views re-create the subtree on change.
    pub render_key: u64,
    pub head: IslandHead,
    /// Slot invocation data read from the placeholders.
    pub slot_props: BTreeMap<String, Vec<Value>>,
    /// Slot names present in the HTML.
    pub available_slots: Vec<String>,
    pub slots: BTreeMap<String, SlotResponse>,
    pub components: BTreeMap<String, ClientComponentRef>,
    pub error: Option<ErrorRecord>,
}

struct Inner {
    app: App,
    name: String,
    props: Mutex<Value>,
    context: Map<String, Value>,
    source: Option<String>,
    fetcher: Arc<dyn IslandFetcher>,
    chunks: Option<Arc<dyn ChunkLoader>>,
    slots: BTreeMap<String, String>,
    fallback: Option<String>,
    view: Mutex<IslandView>,
    token: AtomicU64,
    debounce: Mutex<Option<JoinHandle<()>>>,
}

/// Builds a [`ClientIsland`].
pub struct ClientIslandBuilder {
    app: App,
    name: String,
    props: Value,
    context: Map<String, Value>,
    source: Option<String>,
    fetcher: Arc<dyn IslandFetcher>,
    chunks: Option<Arc<dyn ChunkLoader>>,
    slots: BTreeMap<String, String>,
    fallback: Option<String>,
}

impl ClientIslandBuilder {
    pub fn props(mut self, props: Value) -> Self {
        self.props = props;
        self
    }

    /// Route context sent with every request.
    pub fn context(mut self, context: Map<String, Value>) -> Self {
        self.context.extend(context);
        self
    }

    /// Base URL of a remote island server.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn chunks(mut self, loader: Arc<dyn ChunkLoader>) -> Self {
        self.chunks = Some(loader);
        self
    }

    /// Content the page provides for slot `name`.
    pub fn slot(mut self, name: impl Into<String>, html: impl Into<String>) -> Self {
        self.slots.insert(name.into(), html.into());
        self
    }

    pub fn fallback(mut self, html: impl Into<String>) -> Self {
        self.fallback = Some(html.into());
        self
    }

    pub fn build(self) -> ClientIsland {
        ClientIsland {
            inner: Arc::new(Inner {
                app: self.app,
                name: self.name,
                props: Mutex::new(self.props),
                context: self.context,
                source: self.source,
                fetcher: self.fetcher,
                chunks: self.chunks,
                slots: self.slots,
                fallback: self.fallback,
                view: Mutex::default(),
                token: AtomicU64::new(0),
                debounce: Mutex::new(None),
            }),
        }
    }
}

/// An island on the client.
#[derive(Clone)]
pub struct ClientIsland {
    inner: Arc<Inner>,
}

impl ClientIsland {
    pub fn builder(app: &App, name: impl Into<String>, fetcher: Arc<dyn IslandFetcher>) -> ClientIslandBuilder {
        let mut context = Map::new();
        context.insert("url".into(), Value::from("/"));
        ClientIslandBuilder {
            app: app.clone(),
            name: name.into(),
            props: Value::Object(Map::new()),
            context,
            source: None,
            fetcher,
            chunks: None,
            slots: BTreeMap::new(),
            fallback: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn props(&self) -> Value {
        lock(&self.inner.props).clone()
    }

    pub fn view(&self) -> IslandView {
        lock(&self.inner.view).clone()
    }

    fn request(&self) -> IslandRequest {
        IslandRequest::new(self.inner.name.clone(), self.props()).with_context(self.inner.context.clone())
    }

    /// The key for the current props.
    pub fn key(&self) -> String {
        let hash = self.request().computed_hash(self.inner.source.as_deref());
        key::island_key(&self.inner.name, &hash)
    }

    /// First load. While hydrating a server-rendered page the markup already
    /// in the DOM is adopted as-is and nothing is fetched.
    pub async fn setup(&self, existing_dom: Option<&str>) {
        let app = &self.inner.app;
        if let Some(html) = existing_dom.filter(|_| app.is_hydrating() && app.payload().server_rendered()) {
            let key = self.key();
            let cached = app
                .payload()
                .get(&key)
                .and_then(|value| isle_payload::from_value::<IslandResponse>(value).ok());
            debug!(island = %key, "adopting server-rendered island");
            let mut view = lock(&self.inner.view);
            view.key = key;
            view.uid = marker::root_uid(html);
            view.html = html.to_string();
            view.slot_props = marker::slot_props(html);
            view.available_slots = marker::slot_names(html);
            if let Some(cached) = cached {
                view.head = cached.head;
                view.slots = cached.slots;
                view.components = cached.components;
            }
            return;
        }
        self.fetch(false).await;
    }

    /// Load the island for the current props. Unless `force` is set, a
    /// response cached in the payload is used. Failures are recorded, never
    /// returned.
    pub async fn fetch(&self, force: bool) {
        let token = self.inner.token.fetch_add(1, Ordering::SeqCst) + 1;
        let app = &self.inner.app;
        let mut request = self.request();
        let hash = request.computed_hash(self.inner.source.as_deref());
        let island_key = key::island_key(&self.inner.name, &hash);
        request.hash = Some(hash.clone());

        if !force {
            if let Some(cached) = app.payload().get(&island_key) {
                match isle_payload::from_value::<IslandResponse>(cached) {
                    Ok(response) => {
                        self.apply(token, island_key, response).await;
                        return;
                    }
                    Err(error) => debug!(island = %island_key, %error, "ignoring unreadable cached island"),
                }
            }
        }

        let path = format!(
            "{}{}",
            self.inner.source.as_deref().unwrap_or_default().trim_end_matches('/'),
            key::island_path(&app.config().island_prefix, &self.inner.name, &hash)
        );
        match self.fetch_shared(&island_key, path, request).await {
            Ok(response) => {
                match isle_payload::to_value(&response) {
                    Ok(value) => app.payload().set(&island_key, value),
                    Err(error) => warn!(island = %island_key, %error, "island response not cached"),
                }
                app.payload().set_error(&island_key, None);
                self.apply(token, island_key, response).await;
            }
            Err(record) => {
                warn!(island = %island_key, error = %record.message, "island fetch failed");
                app.payload().set_error(&island_key, Some(record.clone()));
                if self.is_current(token) {
                    let mut view = lock(&self.inner.view);
                    view.key = island_key;
                    view.error = Some(record);
                }
            }
        }
    }

    async fn fetch_shared(&self, island_key: &str, path: String, request: IslandRequest) -> FetchOutcome {
        let app = &self.inner.app;
        let caches = app.scoped::<IslandCaches>();
        let shared = {
            let mut in_flight = lock(&caches.in_flight);
            match in_flight.get(island_key) {
                Some(existing) => {
                    debug!(island = %island_key, "joining in-flight island fetch");
                    existing.clone()
                }
                None => {
                    let fetcher = self.inner.fetcher.clone();
                    let fut = async move { fetcher.fetch(&path, &request).await.map_err(|e| e.to_record()) }
                        .boxed()
                        .shared();
                    in_flight.insert(island_key.to_string(), fut.clone());
                    fut
                }
            }
        };

        let outcome = app.run_with_context(shared.clone()).await;
        let mut in_flight = lock(&caches.in_flight);
        if in_flight.get(island_key).is_some_and(|f| f.ptr_eq(&shared)) {
            in_flight.remove(island_key);
        }
        outcome
    }

    fn is_current(&self, token: u64) -> bool {
        self.inner.token.load(Ordering::SeqCst) == token
    }

    async fn apply(&self, token: u64, island_key: String, response: IslandResponse) {
        if !self.is_current(token) {
            debug!(island = %island_key, "discarding stale island response");
            return;
        }
        let uid = marker::root_uid(&response.html);
        {
            let mut view = lock(&self.inner.view);
            view.key = island_key;
            view.uid = uid.clone();
            view.slot_props = marker::slot_props(&response.html);
            view.available_slots = marker::slot_names(&response.html);
            view.html = response.html;
            view.render_key += 1;
            view.head = response.head;
            view.slots = response.slots;
            view.components = response.components.clone();
            view.error = None;
        }

        if self.inner.app.config().selective_client {
            if let (Some(loader), Some(uid)) = (&self.inner.chunks, uid) {
                self.mount_components(loader, &uid, &response.components).await;
            }
        }
    }

    async fn mount_components(
        &self,
        loader: &Arc<dyn ChunkLoader>,
        uid: &str,
        components: &BTreeMap<String, ClientComponentRef>,
    ) {
        let app = &self.inner.app;
        let caches = app.scoped::<IslandCaches>();
        for (id, component) in components {
            let load = {
                let mut chunks = lock(&caches.chunks);
                chunks
                    .entry(component.chunk.clone())
                    .or_insert_with(|| {
                        let loader = loader.clone();
                        let chunk = component.chunk.clone();
                        async move { loader.load(&chunk).await.map_err(|e| e.to_record()) }
                            .boxed()
                            .shared()
                    })
                    .clone()
            };
            if let Err(error) = load.await {
                warn!(chunk = %component.chunk, error = %error.message, "chunk failed to load");
                let args = HookArgs::ChunkError {
                    chunk: component.chunk.clone(),
                    error,
                };
                if let Err(error) = app.call_hook(APP_CHUNK_ERROR, args).await {
                    warn!(%error, "app:chunkError hook failed");
                }
                continue;
            }
            let selector = marker::client_selector(uid, id);
            if let Err(error) = loader.mount(id, &selector, component).await {
                warn!(component = %id, %error, "client component failed to mount");
            }
        }
    }

    /// Replace the props. The island re-fetches once they have been stable
    /// for the configured debounce window.
    pub fn set_props(&self, props: Value) {
        *lock(&self.inner.props) = props;
        let island = self.clone();
        let delay = self.inner.app.config().island_debounce();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            island.fetch(false).await;
        });
        if let Some(previous) = lock(&self.inner.debounce).replace(task) {
            previous.abort();
        }
    }

    /// Wait for a pending debounced fetch, if any.
    pub async fn settle(&self) {
        let pending = lock(&self.inner.debounce).take();
        if let Some(task) = pending {
            let _ = task.await;
        }
    }

    /// Fetch now, dropping any pending debounced fetch.
    pub async fn refresh(&self, force: bool) {
        if let Some(pending) = lock(&self.inner.debounce).take() {
            pending.abort();
        }
        self.fetch(force).await;
    }

    /// Current markup: the island HTML with page slots spliced in, or the
    /// fallback while there is nothing to show.
    pub fn render(&self) -> String {
        let view = lock(&self.inner.view);
        if view.error.is_some() || view.html.is_empty() {
            return self.inner.fallback.clone().unwrap_or_else(|| "<div></div>".to_string());
        }
        let provided: Vec<String> = self
            .inner
            .slots
            .keys()
            .filter(|name| view.available_slots.contains(name))
            .cloned()
            .collect();
        let html = marker::strip_fallbacks(&view.html, &provided);
        let Some(uid) = view.uid.as_deref() else {
            return html;
        };
        let teleports: BTreeMap<String, String> = provided
            .iter()
            .map(|slot| {
                let key = TeleportKey::Slot {
                    uid: uid.to_string(),
                    slot: slot.clone(),
                };
                (key.to_string(), self.inner.slots[slot].clone())
            })
            .collect();
        marker::replace_teleports(&html, &teleports)
    }
}

impl std::fmt::Debug for ClientIsland {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIsland")
            .field("name", &self.inner.name)
            .field("view", &self.view())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IslandError;
    use isle_app::{AppConfig, AppError};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Serves a fixed island, echoing the props into the markup.
    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        paths: Mutex<Vec<String>>,
        delay: Option<Duration>,
        fail: bool,
    }

    #[async_trait]
    impl IslandFetcher for CountingFetcher {
        async fn fetch(&self, path: &str, request: &IslandRequest) -> Result<IslandResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.paths.lock().unwrap().push(path.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(IslandError::fetch("connection refused"));
            }
            let mut components = BTreeMap::new();
            components.insert(
                "Counter-0".to_string(),
                ClientComponentRef {
                    chunk: "/_chunks/Counter.js".into(),
                    props: json!({}),
                    html: String::new(),
                    slots: BTreeMap::new(),
                },
            );
            Ok(IslandResponse {
                id: request.hash.clone(),
                html: format!(
                    "<div data-island-uid=\"u{}\">{}{}</div>",
                    call,
                    request.props,
                    marker::slot_placeholder(&format!("u{}", call), "header", &[json!(1)], Some("<i>fb</i>"))
                ),
                components,
                ..IslandResponse::default()
            })
        }
    }

    #[derive(Default)]
    struct RecordingLoader {
        loads: AtomicUsize,
        mounts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChunkLoader for RecordingLoader {
        async fn load(&self, _chunk: &str) -> isle_app::Result<()> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn mount(&self, _id: &str, selector: &str, _component: &ClientComponentRef) -> isle_app::Result<()> {
            self.mounts.lock().unwrap().push(selector.to_string());
            Ok(())
        }
    }

    fn client_app() -> App {
        App::client(AppConfig::default())
    }

    #[tokio::test]
    async fn fetches_and_caches_in_payload() {
        let app = client_app();
        let fetcher = Arc::new(CountingFetcher::default());
        let island = ClientIsland::builder(&app, "Card", fetcher.clone())
            .props(json!({ "id": 1 }))
            .build();

        island.setup(None).await;
        let view = island.view();
        assert_eq!(view.render_key, 1);
        assert_eq!(view.uid.as_deref(), Some("u0"));
        assert_eq!(view.available_slots, vec!["header"]);
        assert!(app.payload().has(&island.key()));
        assert_eq!(
            fetcher.paths.lock().unwrap()[0],
            format!("/__isle_island/{}.json", island.key())
        );

        // A second instance reads the payload cache.
        let twin = ClientIsland::builder(&app, "Card", fetcher.clone())
            .props(json!({ "id": 1 }))
            .build();
        twin.setup(None).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(twin.view().html, view.html);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_loads_share_one_request() {
        let app = client_app();
        let fetcher = Arc::new(CountingFetcher {
            delay: Some(Duration::from_millis(20)),
            ..CountingFetcher::default()
        });
        let a = ClientIsland::builder(&app, "Card", fetcher.clone()).build();
        let b = ClientIsland::builder(&app, "Card", fetcher.clone()).build();

        tokio::join!(a.setup(None), b.setup(None));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.view().html, b.view().html);

        // Different apps never share.
        let other = ClientIsland::builder(&client_app(), "Card", fetcher.clone()).build();
        other.setup(None).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn prop_changes_debounce_into_one_fetch() {
        let app = client_app();
        let fetcher = Arc::new(CountingFetcher::default());
        let island = ClientIsland::builder(&app, "Search", fetcher.clone())
            .props(json!({ "q": "" }))
            .build();
        island.setup(None).await;

        for q in ["r", "ru", "rus"] {
            island.set_props(json!({ "q": q }));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        island.settle().await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        let view = island.view();
        assert_eq!(view.render_key, 2);
        assert!(view.html.contains(r#"{"q":"rus"}"#));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_responses_are_discarded() {
        let app = client_app();
        let slow = Arc::new(CountingFetcher {
            delay: Some(Duration::from_millis(50)),
            ..CountingFetcher::default()
        });
        let island = ClientIsland::builder(&app, "Card", slow.clone())
            .props(json!({ "v": "old" }))
            .build();

        let old = island.fetch(true);
        let newer = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            *island.inner.props.lock().unwrap() = json!({ "v": "new" });
            island.fetch(true).await;
        };
        tokio::join!(old, newer);

        let view = island.view();
        assert_eq!(view.render_key, 1);
        assert!(view.html.contains("new"));
    }

    #[tokio::test]
    async fn failures_render_the_fallback() {
        let app = client_app();
        let fetcher = Arc::new(CountingFetcher {
            fail: true,
            ..CountingFetcher::default()
        });
        let island = ClientIsland::builder(&app, "Card", fetcher)
            .fallback("<p>offline</p>")
            .build();
        island.setup(None).await;

        assert_eq!(island.render(), "<p>offline</p>");
        let recorded = app.payload().error_for(&island.key()).unwrap();
        assert!(recorded.message.contains("connection refused"));
        assert!(app.payload().global_error().is_none());
    }

    #[tokio::test]
    async fn page_slots_replace_fallbacks() {
        let app = client_app();
        let island = ClientIsland::builder(&app, "Card", Arc::new(CountingFetcher::default()))
            .slot("header", "<h1>page</h1>")
            .slot("missing", "<p>dropped</p>")
            .build();
        island.setup(None).await;

        let html = island.render();
        assert!(html.contains("data-island-slot-data=\"[1]\"><h1>page</h1></div>"));
        assert!(!html.contains("<i>fb</i>"));
        assert!(!html.contains("dropped"));
    }

    #[tokio::test]
    async fn chunks_load_once_per_app() {
        let config = AppConfig {
            selective_client: true,
            ..AppConfig::default()
        };
        let app = App::client(config);
        let loader = Arc::new(RecordingLoader::default());
        let fetcher = Arc::new(CountingFetcher::default());
        for id in 0..2 {
            let island = ClientIsland::builder(&app, "Card", fetcher.clone())
                .props(json!({ "id": id }))
                .chunks(loader.clone())
                .build();
            island.setup(None).await;
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(
            *loader.mounts.lock().unwrap(),
            vec![
                "[data-island-uid='u0'] [data-island-component='Counter-0']".to_string(),
                "[data-island-uid='u1'] [data-island-component='Counter-0']".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn chunk_failures_fire_the_hook() {
        struct Failing;

        #[async_trait]
        impl ChunkLoader for Failing {
            async fn load(&self, chunk: &str) -> isle_app::Result<()> {
                Err(AppError::other(format!("{} is gone", chunk)))
            }

            async fn mount(&self, _: &str, _: &str, _: &ClientComponentRef) -> isle_app::Result<()> {
                panic!("mounted after a failed load");
            }
        }

        let app = App::client(AppConfig {
            selective_client: true,
            ..AppConfig::default()
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        app.hooks().hook(APP_CHUNK_ERROR, move |args| {
            let sink = sink.clone();
            async move {
                if let HookArgs::ChunkError { chunk, .. } = args {
                    sink.lock().unwrap().push(chunk);
                }
                Ok::<(), AppError>(())
            }
        });
        let island = ClientIsland::builder(&app, "Card", Arc::new(CountingFetcher::default()))
            .chunks(Arc::new(Failing))
            .build();
        island.setup(None).await;

        assert_eq!(*seen.lock().unwrap(), vec!["/_chunks/Counter.js".to_string()]);
        assert!(island.view().error.is_none());
    }

    #[tokio::test]
    async fn remote_source_prefixes_the_path_and_changes_the_key() {
        let app = client_app();
        let fetcher = Arc::new(CountingFetcher::default());
        let local = ClientIsland::builder(&app, "Card", fetcher.clone()).build();
        let remote = ClientIsland::builder(&app, "Card", fetcher.clone())
            .source("https://islands.example.com/")
            .build();
        assert_ne!(local.key(), remote.key());

        remote.setup(None).await;
        assert!(fetcher.paths.lock().unwrap()[0].starts_with("https://islands.example.com/__isle_island/Card_"));
    }
}
