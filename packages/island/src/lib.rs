//! Islands: components rendered on the server only, shipped to the client
//! as static HTML with slot placeholders and optional client components.
//!
//! - [`server`] renders registered components, either for the wire endpoint
//!   or inline into a full page.
//! - [`client`] adopts, fetches and refreshes islands in the browser app.
//! - [`marker`] owns the attribute and teleport-key grammar both sides share.

pub mod client;
pub mod error;
pub mod key;
pub mod marker;
pub mod response;
pub mod server;

pub use client::{ChunkLoader, ClientIsland, ClientIslandBuilder, IslandFetcher, IslandView};
pub use error::{IslandError, Result};
pub use key::{island_hash, island_key, island_path, parse_island_path};
pub use marker::TeleportKey;
pub use response::{ClientComponentRef, IslandHead, IslandRequest, IslandResponse, SlotResponse};
pub use server::{component, InlineIsland, IslandRegistry, IslandRenderer, IslandScope, ServerComponent};
