//! The isle application runtime.
//!
//! An [`App`] is created per server request and per client page load. It
//! owns the payload, a named hook bus and the services plugins provide.
//! Plugins run through a dependency-aware executor; the server then renders
//! and embeds the payload, and the client mounts and hydrates from it.
//!
//! ```
//! use isle_app::{App, AppConfig, Plugin};
//! use isle_payload::Value;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let app = App::server(AppConfig::default());
//! let plugins = vec![
//!     Plugin::new(|app: App| async move {
//!         app.payload().set("greeting", Value::from("hello"));
//!         Ok::<(), isle_app::AppError>(())
//!     })
//!     .named("greeting"),
//! ];
//! isle_app::apply_plugins(&app, plugins).await.unwrap();
//! assert_eq!(app.payload().get("greeting"), Some(Value::from("hello")));
//! # });
//! ```

pub mod app;
pub mod async_data;
pub mod config;
pub mod context;
pub mod devlog;
pub mod error;
pub mod error_channel;
pub mod executor;
pub mod hooks;
pub mod hydration;
pub mod lifecycle;
pub mod plugin;
pub mod request;
pub mod state;
pub mod view;

pub use app::{App, AppBuilder, AppFuture, IslandContext, Platform, WeakApp};
pub use async_data::{
    clear_data, fetch_data, fetcher, refresh_data, use_async_data, AsyncData, AsyncDataHandle,
    AsyncStatus, DedupeStrategy, FetchOptions, Fetcher,
};
pub use config::AppConfig;
pub use error::{AppError, InitError, Result};
pub use error_channel::{
    clear_error, current_error, handle_error, show_error, ErrorBoundary, Propagation,
};
pub use executor::apply_plugins;
pub use hooks::{HookArgs, HookBus, HookFn, HookHandle, RenderedContext};
pub use hydration::HydrationRelease;
pub use lifecycle::{mount_client, render_server, LifecycleState, RenderedPage};
pub use plugin::{Enforce, Plugin, PluginMode, Provides};
pub use request::{RequestEvent, StaticRequest};
pub use state::{clear_state, use_state, State};
pub use view::ViewLayer;
