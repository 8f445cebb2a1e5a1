//! isle: a universal application runtime.
//!
//! The same application code renders on the server and hydrates on the
//! client. State crosses the boundary through the payload, plugins set the
//! app up on both sides, and islands ship server-only components as static
//! HTML.
//!
//! This crate re-exports the workspace:
//!
//! - [`payload`]: the payload store and its wire codec
//! - [`app`]: app context, hooks, plugins, hydration and the error channel
//! - [`island`]: server and client islands
//! - [`http`]: the island wire endpoint and HTTP fetcher

pub use isle_app as app;
pub use isle_http as http;
pub use isle_island as island;
pub use isle_payload as payload;

pub use isle_app::{
    mount_client, render_server, use_state, App, AppConfig, AppError, Plugin, RenderedPage, Result,
    ViewLayer,
};
pub use isle_island::{ClientIsland, IslandRenderer};
pub use isle_payload::{ErrorRecord, PayloadCodec, Value};
