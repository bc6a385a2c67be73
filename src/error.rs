use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Unsupported character encoding: {0}")]
    Encoding(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory serialization error: {0}")]
    Serialization(String),

    #[error("Directory deserialization error: {0}")]
    Deserialization(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Invalid: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Expected failures of a single feed URL. Workers record every failure
    /// and keep going, but anything outside this set is logged as an error
    /// rather than a warning.
    pub fn is_per_url(&self) -> bool {
        matches!(
            self,
            Error::HttpError(_)
                | Error::Timeout(_)
                | Error::FeedParse(_)
                | Error::Encoding(_)
                | Error::InvalidUrl(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Error::FeedParse(_) => "FEED_PARSE",
            Error::Encoding(_) => "ENCODING",
            Error::HttpError(_) => "HTTP_ERROR",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::Timeout(_) => "TIMEOUT",
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Deserialization(_) => "DESERIALIZATION",
            Error::Json(_) => "JSON",
            Error::Config(_) => "CONFIG",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Cancelled(_) => "CANCELLED",
            Error::Worker(_) => "WORKER",
            Error::Invalid(_) => "INVALID",
        }
    }
}
