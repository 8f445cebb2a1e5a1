//! Plugin descriptors.
//!
//! A plugin is a setup function plus metadata. Every way of declaring one
//! goes through [`Plugin::new`] or [`Plugin::providing`], so the executor
//! only ever sees this one shape.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::app::{App, Platform};
use crate::error::Result;
use crate::hooks::{hook_fn, HookArgs, HookFn};

/// Values a plugin makes injectable once its setup completes.
#[derive(Default)]
pub struct Provides {
    values: Vec<(String, Arc<dyn Any + Send + Sync>)>,
}

impl Provides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.values.push((name.into(), Arc::new(value)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn into_values(self) -> Vec<(String, Arc<dyn Any + Send + Sync>)> {
        self.values
    }
}

/// Coarse position in the plugin list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Enforce {
    Pre,
    #[default]
    Default,
    Post,
}

impl Enforce {
    fn order(self) -> i32 {
        match self {
            Enforce::Pre => -20,
            Enforce::Default => 0,
            Enforce::Post => 20,
        }
    }
}

/// Which platform a plugin runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PluginMode {
    #[default]
    All,
    Server,
    Client,
}

pub(crate) type SetupFn = Arc<dyn Fn(App) -> BoxFuture<'static, Result<Provides>> + Send + Sync>;

/// A plugin: setup function plus scheduling metadata.
#[derive(Clone)]
pub struct Plugin {
    name: Option<String>,
    pub(crate) setup: SetupFn,
    depends_on: Vec<String>,
    parallel: bool,
    enforce: Enforce,
    order: Option<i32>,
    mode: PluginMode,
    islands: bool,
    pub(crate) hooks: Vec<(String, HookFn)>,
}

impl Plugin {
    /// A plugin whose setup provides nothing.
    pub fn new<F, Fut>(setup: F) -> Self
    where
        F: Fn(App) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::from_setup(Arc::new(move |app| {
            let fut = setup(app);
            async move {
                fut.await?;
                Ok(Provides::default())
            }
            .boxed()
        }))
    }

    /// A plugin whose setup returns injectable values.
    pub fn providing<F, Fut>(setup: F) -> Self
    where
        F: Fn(App) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Provides>> + Send + 'static,
    {
        Self::from_setup(Arc::new(move |app| setup(app).boxed()))
    }

    fn from_setup(setup: SetupFn) -> Self {
        Self {
            name: None,
            setup,
            depends_on: Vec::new(),
            parallel: false,
            enforce: Enforce::Default,
            order: None,
            mode: PluginMode::All,
            islands: true,
            hooks: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn enforce(mut self, enforce: Enforce) -> Self {
        self.enforce = enforce;
        self
    }

    /// Explicit order; takes precedence over `enforce`.
    pub fn order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn mode(mut self, mode: PluginMode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether the plugin also runs inside island renders.
    pub fn islands(mut self, islands: bool) -> Self {
        self.islands = islands;
        self
    }

    /// Declare a hook; registered before any plugin runs.
    pub fn hook<F, Fut>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.hooks.push((name.to_string(), hook_fn(f)));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn resolved_order(&self) -> i32 {
        self.order.unwrap_or_else(|| self.enforce.order())
    }

    /// Label used in logs and errors.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    pub(crate) fn applies_to(&self, app: &App) -> bool {
        let platform_ok = match self.mode {
            PluginMode::All => true,
            PluginMode::Server => app.platform() == Platform::Server,
            PluginMode::Client => app.platform() == Platform::Client,
        };
        platform_ok && (self.islands || app.island().is_none())
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("parallel", &self.parallel)
            .field("order", &self.resolved_order())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Stable sort by resolved order.
pub fn sort_plugins(plugins: &mut [Plugin]) {
    plugins.sort_by_key(Plugin::resolved_order);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn noop() -> Plugin {
        Plugin::new(|_| async { Ok::<(), AppError>(()) })
    }

    #[test]
    fn sort_is_stable_and_honors_explicit_order() {
        let mut plugins = vec![
            noop().named("a"),
            noop().named("late").enforce(Enforce::Post),
            noop().named("b"),
            noop().named("early").enforce(Enforce::Pre),
            noop().named("explicit").enforce(Enforce::Pre).order(5),
        ];
        sort_plugins(&mut plugins);
        let names: Vec<_> = plugins.iter().map(|p| p.label().to_string()).collect();
        assert_eq!(names, vec!["early", "a", "b", "explicit", "late"]);
    }

    #[test]
    fn builder_metadata() {
        let plugin = noop()
            .named("router")
            .depends_on(["auth", "store"])
            .parallel(true);
        assert_eq!(plugin.name(), Some("router"));
        assert_eq!(plugin.dependencies(), ["auth".to_string(), "store".to_string()]);
        assert!(plugin.is_parallel());
        assert_eq!(noop().label(), "<anonymous>");
    }

    #[test]
    fn mode_and_island_filtering() {
        let server = App::server(Default::default());
        let client = App::client(Default::default());
        let island = App::builder(Platform::Server)
            .island(crate::app::IslandContext {
                id: "x".into(),
                name: "X".into(),
                props: Default::default(),
                context: Default::default(),
            })
            .build();

        let server_only = noop().mode(PluginMode::Server);
        assert!(server_only.applies_to(&server));
        assert!(!server_only.applies_to(&client));

        let page_only = noop().islands(false);
        assert!(page_only.applies_to(&server));
        assert!(!page_only.applies_to(&island));
    }
}
