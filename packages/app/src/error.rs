//! Error types for the application layer.

use isle_payload::ErrorRecord;

/// Problems with the plugin list detected before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("plugin '{plugin}' depends on '{dependency}', which is not registered")]
    UnknownDependency { plugin: String, dependency: String },

    #[error("plugin dependency cycle: {}", plugins.join(" -> "))]
    Cycle { plugins: Vec<String> },

    #[error("plugin name '{name}' is registered twice")]
    DuplicateName { name: String },

    #[error("plugins never became ready: {}", plugins.join(", "))]
    Unresolved { plugins: Vec<String> },
}

/// Errors raised by the application runtime and by user callbacks.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Fatal startup error.
    #[error("initialization failed: {0}")]
    Init(#[from] InitError),

    /// A composable was called outside of any application context.
    #[error("no application context is active")]
    MissingContext,

    #[error("plugin '{plugin}' failed: {source}")]
    Plugin {
        plugin: String,
        #[source]
        source: Box<AppError>,
    },

    /// An error that already has its payload shape.
    #[error("{0}")]
    Render(ErrorRecord),

    #[error("payload error: {0}")]
    Payload(#[from] isle_payload::Error),

    /// Generic error with message.
    #[error("{message}")]
    Other { message: String },
}

impl AppError {
    pub fn other(message: impl Into<String>) -> Self {
        AppError::Other {
            message: message.into(),
        }
    }

    /// Whether this error must abort startup instead of degrading.
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::Init(_) | AppError::MissingContext => true,
            AppError::Plugin { source, .. } => source.is_fatal(),
            AppError::Render(record) => record.fatal,
            _ => false,
        }
    }

    /// The serializable form stored in the payload.
    pub fn to_record(&self) -> ErrorRecord {
        match self {
            AppError::Render(record) => record.clone(),
            AppError::Plugin { source, .. } => source.to_record(),
            other => {
                let record = ErrorRecord::from_error(other);
                if other.is_fatal() {
                    record.fatal()
                } else {
                    record
                }
            }
        }
    }
}

impl From<ErrorRecord> for AppError {
    fn from(record: ErrorRecord) -> Self {
        AppError::Render(record)
    }
}

/// Result type alias for application operations.
pub type Result<T> = std::result::Result<T, AppError>;
