//! # isle-http
//!
//! HTTP plumbing around the isle runtime.
//!
//! - [`IslandEndpoint`] serves `GET|POST <prefix>/<name>_<hash>.json`,
//!   rendering islands through an [`isle_island::IslandRenderer`].
//! - [`HttpIslandFetcher`] is the client half: an
//!   [`isle_island::IslandFetcher`] that calls such an endpoint.
//! - [`HttpRequestEvent`] adapts `http` requests to the runtime's request
//!   event, collecting the status and headers a render sets.
//!
//! ```ignore
//! use isle_http::{HttpIslandFetcher, IslandEndpoint};
//!
//! let endpoint = IslandEndpoint::new(renderer);
//! let response = endpoint.handle(request).await;
//!
//! let fetcher = HttpIslandFetcher::reqwest("https://shop.example", Duration::from_secs(10))?;
//! let island = ClientIsland::builder(&app, "Price", Arc::new(fetcher)).build();
//! ```

pub mod endpoint;
pub mod error;
pub mod event;
pub mod executor;
pub mod fetcher;
pub mod types;

pub use endpoint::{IslandEndpoint, JSON_CONTENT_TYPE};
pub use error::{Error, Result};
pub use event::HttpRequestEvent;
pub use executor::{HttpExecutor, ReqwestExecutor};
pub use fetcher::HttpIslandFetcher;
pub use types::{HttpRequest, HttpResponse, Method};
