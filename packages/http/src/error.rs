use isle_island::IslandError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request failed with {status}: {message}")]
    Status { status: u16, message: String },
}

impl From<Error> for IslandError {
    fn from(error: Error) -> Self {
        IslandError::fetch(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
