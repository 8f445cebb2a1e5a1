//! # isle-payload
//!
//! The state container that bridges server render and client hydration.
//!
//! ## Layers
//!
//! - [`Value`]: the data model stored under `data` and `state`
//! - [`PayloadCodec`]: wire encoding with named reducer/reviver pairs
//! - [`Payload`]: the serializable snapshot (data, state, errors, once, ...)
//! - [`PayloadStore`]: the live, lock-protected store with change
//!   notifications, the `once` ledger and keyed pending operations
//! - [`embed`]: placing the encoded payload into an HTML page and back
//!
//! ## Example
//!
//! ```rust
//! use isle_payload::{PayloadCodec, PayloadStore, Value};
//!
//! let store = PayloadStore::new();
//! store.set_state("count", Value::from(1i64));
//!
//! let codec = PayloadCodec::new();
//! let text = store.snapshot().encode(&codec).unwrap();
//! let revived = isle_payload::Payload::decode(&codec, &text).unwrap();
//! let fresh = PayloadStore::from_payload(revived);
//! assert_eq!(fresh.state("count"), Some(Value::Integer(1)));
//! ```

pub mod codec;
pub mod convert;
pub mod embed;
pub mod error;
pub mod payload;
pub mod record;
pub mod store;
pub mod value;

pub use codec::{PayloadCodec, PayloadReducer, PayloadReviver};
pub use convert::{from_value, to_value};
pub use embed::EmbeddedPayload;
pub use error::{Error, Result};
pub use payload::{state_key, Payload, SplitPayload};
pub use record::ErrorRecord;
pub use store::{ClearKeys, FetchResult, PayloadChange, PayloadStore, PendingFetch, Section};
pub use value::Value;
