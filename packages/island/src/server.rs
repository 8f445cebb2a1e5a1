//! Server-side island rendering.
//!
//! Each island render gets its own narrow [`App`] carrying an
//! [`IslandContext`]. The component writes its markup through an
//! [`IslandScope`], which collects slot placeholders, client component
//! references, head fragments and the teleported content an inline render
//! splices back into the page.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use isle_app::hooks::{ISLAND_RENDERED, APP_CREATED};
use isle_app::{
    apply_plugins, handle_error, App, AppConfig, HookArgs, IslandContext, Platform, Plugin,
    RenderedContext, RequestEvent,
};
use isle_payload::{ErrorRecord, PayloadCodec};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{IslandError, Result};
use crate::key;
use crate::marker::{self, TeleportKey};
use crate::response::{ClientComponentRef, IslandHead, IslandRequest, IslandResponse, SlotResponse};

/// A component that can be rendered as an island.
#[async_trait]
pub trait ServerComponent: Send + Sync {
    async fn render(&self, scope: &IslandScope) -> isle_app::Result<String>;
}

type RenderFn = Arc<dyn Fn(IslandScope) -> BoxFuture<'static, isle_app::Result<String>> + Send + Sync>;

struct FnComponent(RenderFn);

#[async_trait]
impl ServerComponent for FnComponent {
    async fn render(&self, scope: &IslandScope) -> isle_app::Result<String> {
        (self.0)(scope.clone()).await
    }
}

/// Wrap a closure as a [`ServerComponent`].
pub fn component<F, Fut>(render: F) -> Arc<dyn ServerComponent>
where
    F: Fn(IslandScope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = isle_app::Result<String>> + Send + 'static,
{
    Arc::new(FnComponent(Arc::new(move |scope| render(scope).boxed())))
}

/// Server components addressable by name.
#[derive(Default, Clone)]
pub struct IslandRegistry {
    components: HashMap<String, Arc<dyn ServerComponent>>,
}

impl IslandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, component: Arc<dyn ServerComponent>) -> &mut Self {
        self.components.insert(name.into(), component);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ServerComponent>> {
        self.components.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }
}

impl std::fmt::Debug for IslandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.components.keys().collect();
        names.sort();
        f.debug_struct("IslandRegistry").field("components", &names).finish()
    }
}

#[derive(Default)]
struct ScopeState {
    head: IslandHead,
    slots: BTreeMap<String, SlotResponse>,
    components: BTreeMap<String, ClientComponentRef>,
    teleports: BTreeMap<String, String>,
}

/// What a component sees while it renders as an island.
#[derive(Clone)]
pub struct IslandScope {
    app: App,
    uid: String,
    props: Value,
    state: Arc<Mutex<ScopeState>>,
}

impl IslandScope {
    fn new(app: App, uid: String, props: Value) -> Self {
        Self {
            app,
            uid,
            props,
            state: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    /// Root uid of this render.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn props(&self) -> &Value {
        &self.props
    }

    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    /// Emit a slot placeholder. `data` is what the slot is invoked with; the
    /// client re-invokes the slot once per call.
    pub fn slot(&self, name: &str, data: Value, fallback: Option<&str>) -> String {
        let mut state = self.lock();
        let slot = state.slots.entry(name.to_string()).or_default();
        slot.props.push(data.clone());
        if let Some(html) = fallback {
            slot.fallback = Some(html.to_string());
            state.teleports.insert(
                TeleportKey::Fallback { slot: name.to_string() }.to_string(),
                html.to_string(),
            );
        }
        marker::slot_placeholder(&self.uid, name, &[data], fallback)
    }

    /// Reference a component that hydrates on the client. Returns the anchor
    /// markup; `html` is its server render.
    pub fn client_component(&self, name: &str, chunk: &str, props: Value, html: &str) -> String {
        let mut state = self.lock();
        let id = format!("{}-{}", name, state.components.len());
        state.components.insert(
            id.clone(),
            ClientComponentRef {
                chunk: chunk.to_string(),
                props,
                html: html.to_string(),
                slots: BTreeMap::new(),
            },
        );
        state.teleports.insert(
            TeleportKey::Client {
                uid: self.uid.clone(),
                client: id.clone(),
            }
            .to_string(),
            html.to_string(),
        );
        marker::client_placeholder(&self.uid, &id)
    }

    pub fn link(&self, attrs: &[(&str, &str)]) {
        let link = attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.lock().head.link.push(link);
    }

    pub fn style(&self, css: &str) {
        let mut style = BTreeMap::new();
        style.insert("innerHTML".to_string(), css.to_string());
        self.lock().head.style.push(style);
    }

    fn finish(&self) -> ScopeState {
        std::mem::take(&mut *self.lock())
    }
}

/// An island rendered into a full page.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineIsland {
    /// Payload key the response is cached under.
    pub key: String,
    pub html: String,
    pub head: IslandHead,
    /// Set when the island failed and `html` is its fallback.
    pub error: Option<ErrorRecord>,
}

struct Rendered {
    response: IslandResponse,
    teleports: BTreeMap<String, String>,
}

/// Renders registered components as islands.
#[derive(Clone)]
pub struct IslandRenderer {
    registry: Arc<IslandRegistry>,
    config: AppConfig,
    codec: PayloadCodec,
    plugins: Vec<Plugin>,
}

impl IslandRenderer {
    pub fn new(registry: IslandRegistry, config: AppConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            codec: PayloadCodec::new(),
            plugins: Vec::new(),
        }
    }

    pub fn with_codec(mut self, codec: PayloadCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Plugins applied to every island app. Plugins marked
    /// `islands(false)` are skipped by the executor.
    pub fn with_plugins(mut self, plugins: Vec<Plugin>) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn registry(&self) -> &IslandRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Render one island for the wire endpoint.
    pub async fn render(
        &self,
        request: &IslandRequest,
        event: Option<Arc<dyn RequestEvent>>,
    ) -> Result<IslandResponse> {
        Ok(self.render_parts(request, event).await?.response)
    }

    async fn render_parts(
        &self,
        request: &IslandRequest,
        event: Option<Arc<dyn RequestEvent>>,
    ) -> Result<Rendered> {
        let component = self
            .registry
            .get(&request.name)
            .ok_or_else(|| IslandError::UnknownComponent {
                name: request.name.clone(),
            })?;
        let hash = request.hash.clone().unwrap_or_else(|| request.computed_hash(None));
        let island_key = key::island_key(&request.name, &hash);

        let mut builder = App::builder(Platform::Server)
            .config(self.config.clone())
            .codec(self.codec.clone())
            .island(IslandContext {
                id: island_key.clone(),
                name: request.name.clone(),
                props: isle_payload::convert::json_to_value(request.props.clone()),
                context: isle_payload::convert::json_to_value(Value::Object(request.context.clone())),
            });
        if let Some(event) = event {
            builder = builder.request(event);
        }
        let app = builder.build();
        let uid = uuid::Uuid::new_v4().simple().to_string();
        let scope = IslandScope::new(app.clone(), uid.clone(), request.props.clone());
        debug!(island = %island_key, %uid, "rendering island");

        let html = app
            .run_with_context(async {
                apply_plugins(&app, self.plugins.clone()).await?;
                app.call_hook(APP_CREATED, HookArgs::Empty).await?;
                component.render(&scope).await
            })
            .await;
        let html = match html {
            Ok(html) => html,
            Err(err) => {
                let record = handle_error(&app, &err).await;
                return Err(IslandError::Render(isle_app::AppError::Render(record)));
            }
        };
        let html = marker::with_root_uid(marker::strip_root(&html), &uid);

        let state = scope.finish();
        let rendered = RenderedContext::new(html.clone());
        if let Err(error) = app.call_hook(ISLAND_RENDERED, HookArgs::Rendered(rendered)).await {
            warn!(island = %island_key, %error, "island:rendered hook failed");
        }

        Ok(Rendered {
            response: IslandResponse {
                id: Some(island_key),
                html,
                head: state.head,
                slots: state.slots,
                components: state.components,
            },
            teleports: state.teleports,
        })
    }

    /// Render an island into a full page rendered by `page`.
    ///
    /// `slots` holds the page's content for the island's slots. The response
    /// is cached in the page payload so the client need not fetch it again.
    /// A failing island yields `fallback` (or an empty placeholder) and an
    /// error entry in the page payload; it never fails the page.
    pub async fn render_inline(
        &self,
        page: &App,
        name: &str,
        props: Value,
        slots: &BTreeMap<String, String>,
        fallback: Option<&str>,
    ) -> InlineIsland {
        let mut context = Map::new();
        if let Some(event) = page.request() {
            let path = event.path();
            let url = path.split('?').next().unwrap_or_default().to_string();
            context.insert("url".into(), Value::from(url));
        }
        let mut request = IslandRequest::new(name, props).with_context(context);
        let hash = request.computed_hash(None);
        request.hash = Some(hash.clone());
        let island_key = key::island_key(name, &hash);

        match self.render_parts(&request, page.request().cloned()).await {
            Ok(Rendered { response, mut teleports }) => {
                match isle_payload::to_value(&response) {
                    Ok(value) => page.payload().set(&island_key, value),
                    Err(error) => warn!(island = %island_key, %error, "island response not cached"),
                }
                page.payload().set_error(&island_key, None);

                let uid = marker::root_uid(&response.html).unwrap_or_default();
                let provided: Vec<String> = slots.keys().cloned().collect();
                for (slot, content) in slots {
                    teleports.insert(
                        TeleportKey::Slot {
                            uid: uid.clone(),
                            slot: slot.clone(),
                        }
                        .to_string(),
                        content.clone(),
                    );
                }
                let html = marker::strip_fallbacks(&response.html, &provided);
                InlineIsland {
                    key: island_key,
                    html: marker::replace_teleports(&html, &teleports),
                    head: response.head,
                    error: None,
                }
            }
            Err(err) => {
                let record = err.to_record();
                warn!(island = %island_key, error = %record.message, "island failed, rendering fallback");
                page.payload().set_error(&island_key, Some(record.clone()));
                InlineIsland {
                    key: island_key,
                    html: fallback.unwrap_or("<div></div>").to_string(),
                    head: IslandHead::default(),
                    error: Some(record),
                }
            }
        }
    }
}

impl std::fmt::Debug for IslandRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IslandRenderer")
            .field("registry", &self.registry)
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isle_app::{AppError, StaticRequest};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn card() -> Arc<dyn ServerComponent> {
        component(|scope: IslandScope| async move {
            let title = scope.prop("title").and_then(Value::as_str).unwrap_or("untitled").to_string();
            scope.style(".card{padding:1em}");
            let header = scope.slot("header", json!({ "title": title }), Some("<h2>default</h2>"));
            let counter = scope.client_component("Counter", "/_chunks/Counter.js", json!({ "start": 1 }), "<button>1</button>");
            Ok::<String, AppError>(format!("<isle-root><article>{}{}<p>{}</p></article></isle-root>", header, counter, title))
        })
    }

    fn broken() -> Arc<dyn ServerComponent> {
        component(|_| async { Err::<String, _>(AppError::other("database down")) })
    }

    fn renderer() -> IslandRenderer {
        let mut registry = IslandRegistry::new();
        registry.register("Card", card()).register("Broken", broken());
        IslandRenderer::new(registry, AppConfig::default())
    }

    #[tokio::test]
    async fn standalone_render_produces_markers() {
        let request = IslandRequest::new("Card", json!({ "title": "Hello" }));
        let response = renderer().render(&request, None).await.unwrap();

        let uid = marker::root_uid(&response.html).unwrap();
        assert!(response.html.starts_with(&format!("<article data-island-uid=\"{}\">", uid)));
        assert_eq!(response.id, Some(key::island_key("Card", &request.computed_hash(None))));
        assert_eq!(response.slots["header"].props, vec![json!({ "title": "Hello" })]);
        assert_eq!(response.slots["header"].fallback.as_deref(), Some("<h2>default</h2>"));
        assert_eq!(response.components["Counter-0"].chunk, "/_chunks/Counter.js");
        assert_eq!(response.head.style.len(), 1);
        assert_eq!(marker::slot_names(&response.html), vec!["header"]);
    }

    #[tokio::test]
    async fn unknown_component_is_404() {
        let err = renderer()
            .render(&IslandRequest::new("Nope", json!({})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IslandError::UnknownComponent { .. }));
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn rendered_hook_fires_for_each_render() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let plugin = Plugin::new(|_| async { Ok::<(), AppError>(()) }).hook(ISLAND_RENDERED, move |args| {
            let seen = seen.clone();
            async move {
                if let HookArgs::Rendered(ctx) = args {
                    assert!(ctx.html.contains("data-island-uid"));
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                Ok::<(), AppError>(())
            }
        });
        let renderer = renderer().with_plugins(vec![plugin]);
        for title in ["a", "b"] {
            renderer
                .render(&IslandRequest::new("Card", json!({ "title": title })), None)
                .await
                .unwrap();
        }
        let _ = renderer.render(&IslandRequest::new("Broken", json!({})), None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn island_apps_carry_their_context() {
        let mut registry = IslandRegistry::new();
        registry.register(
            "Whoami",
            component(|scope: IslandScope| async move {
                let island = scope.app().island().cloned().ok_or(AppError::MissingContext)?;
                let current = isle_app::context::current()?;
                assert!(current.ptr_eq(scope.app()));
                Ok::<String, AppError>(format!("<p>{}</p>", island.name))
            }),
        );
        let response = IslandRenderer::new(registry, AppConfig::default())
            .render(&IslandRequest::new("Whoami", json!({})), None)
            .await
            .unwrap();
        assert!(response.html.ends_with(">Whoami</p>"));
    }

    #[tokio::test]
    async fn inline_render_splices_teleports_and_caches() {
        let page = App::builder(Platform::Server)
            .request(Arc::new(StaticRequest::new("/shop?x=1")))
            .build();
        let mut slots = BTreeMap::new();
        slots.insert("header".to_string(), "<h2>From page</h2>".to_string());

        let inline = renderer()
            .render_inline(&page, "Card", json!({ "title": "Inline" }), &slots, None)
            .await;
        assert!(inline.error.is_none());
        assert!(inline.html.contains("<h2>From page</h2>"));
        assert!(!inline.html.contains("<h2>default</h2>"));
        assert!(inline.html.contains("data-island-component=\"Counter-0\"><button>1</button></div>"));

        let cached: IslandResponse = isle_payload::from_value(page.payload().get(&inline.key).unwrap()).unwrap();
        assert_eq!(cached.head, inline.head);

        let mut request = IslandRequest::new("Card", json!({ "title": "Inline" }));
        request.context.insert("url".into(), json!("/shop"));
        assert_eq!(inline.key, key::island_key("Card", &request.computed_hash(None)));
    }

    #[tokio::test]
    async fn failing_island_never_fails_the_page() {
        let page = App::server(AppConfig::default());
        let inline = renderer()
            .render_inline(&page, "Broken", json!({}), &BTreeMap::new(), Some("<p>unavailable</p>"))
            .await;
        assert_eq!(inline.html, "<p>unavailable</p>");
        assert_eq!(page.payload().error_for(&inline.key).unwrap().message, "database down");
        assert!(page.payload().global_error().is_none());

        let bare = renderer()
            .render_inline(&page, "Missing", json!({}), &BTreeMap::new(), None)
            .await;
        assert_eq!(bare.html, "<div></div>");
        assert_eq!(bare.error.unwrap().status_code, 404);
    }

    #[tokio::test]
    async fn repeated_slot_fills_every_placeholder() {
        let mut registry = IslandRegistry::new();
        registry.register(
            "List",
            component(|scope: IslandScope| async move {
                let first = scope.slot("item", json!(1), None);
                let second = scope.slot("item", json!(2), None);
                Ok::<String, AppError>(format!("<ul>{}{}</ul>", first, second))
            }),
        );
        let renderer = IslandRenderer::new(registry, AppConfig::default());

        let response = renderer.render(&IslandRequest::new("List", json!({})), None).await.unwrap();
        assert_eq!(response.slots["item"].props, vec![json!(1), json!(2)]);
        assert_eq!(marker::slot_props(&response.html)["item"], vec![json!(1), json!(2)]);
        assert_eq!(marker::slot_names(&response.html), vec!["item"]);

        let page = App::server(AppConfig::default());
        let mut slots = BTreeMap::new();
        slots.insert("item".to_string(), "<li>X</li>".to_string());
        let inline = renderer.render_inline(&page, "List", json!({}), &slots, None).await;
        assert_eq!(inline.html.matches("<li>X</li>").count(), 2);
    }
}
