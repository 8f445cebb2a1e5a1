use isle_app::AppError;
use isle_payload::ErrorRecord;

#[derive(thiserror::Error, Debug)]
pub enum IslandError {
    #[error("no server component named '{name}'")]
    UnknownComponent { name: String },

    #[error("malformed island path: {path}")]
    MalformedPath { path: String },

    #[error("island props are not valid JSON: {0}")]
    MalformedProps(#[source] serde_json::Error),

    #[error("island fetch failed: {message}")]
    Fetch { message: String },

    #[error("island render failed: {0}")]
    Render(#[from] AppError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload error: {0}")]
    Payload(#[from] isle_payload::Error),
}

impl IslandError {
    pub fn fetch(message: impl Into<String>) -> Self {
        IslandError::Fetch {
            message: message.into(),
        }
    }

    /// HTTP status the wire endpoint answers with.
    pub fn status(&self) -> u16 {
        match self {
            IslandError::MalformedPath { .. } | IslandError::MalformedProps(_) => 400,
            IslandError::UnknownComponent { .. } => 404,
            IslandError::Render(err) => err.to_record().status_code,
            _ => 500,
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        match self {
            IslandError::Render(err) => err.to_record(),
            other => ErrorRecord::from_error(other).with_status(other.status(), status_text(other.status())),
        }
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}

pub type Result<T> = std::result::Result<T, IslandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(IslandError::MalformedPath { path: "/x".into() }.status(), 400);
        assert_eq!(IslandError::UnknownComponent { name: "Nope".into() }.status(), 404);
        assert_eq!(IslandError::fetch("timeout").status(), 500);

        let render: IslandError = AppError::from(ErrorRecord::new("gone").with_status(410, "Gone")).into();
        assert_eq!(render.status(), 410);
        assert_eq!(render.to_record().message, "gone");
    }

    #[test]
    fn records_carry_status() {
        let record = IslandError::UnknownComponent { name: "Card".into() }.to_record();
        assert_eq!(record.status_code, 404);
        assert_eq!(record.status_message.as_deref(), Some("Not Found"));
        assert!(record.message.contains("Card"));
    }
}
