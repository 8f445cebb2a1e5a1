//! Error types for the payload layer.

/// Errors raised while encoding, decoding or embedding a payload.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A value has no registered reducer and cannot be represented on the wire.
    #[error("no reducer registered for extension value '{kind}'")]
    Unserializable { kind: String },

    /// The wire form references a reviver that was never registered.
    #[error("no reviver registered for '{name}'")]
    UnknownReviver { name: String },

    /// A reviver rejected its input.
    #[error("reviver '{name}' failed: {message}")]
    Revive { name: String, message: String },

    /// The wire form is structurally invalid.
    #[error("malformed payload: {message}")]
    Malformed { message: String },

    /// A reducer or reviver was registered twice under the same name.
    #[error("duplicate payload type '{name}'")]
    DuplicateType { name: String },

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::Malformed {
            message: message.into(),
        }
    }
}

/// Result type alias for payload operations.
pub type Result<T> = std::result::Result<T, Error>;
