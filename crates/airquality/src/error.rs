/// Errors reported by the collector and its dataset client
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration file or CLI override is invalid
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// No usable credential was found, or it could not be exchanged for a token
    #[error("Credential error: {0}")]
    Credentials(String),

    /// Transport-level failure talking to the dataset service
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The dataset service rejected or failed the query
    #[error("Query failed with status {status}: {message}")]
    Query { status: u16, message: String },

    /// A pollutant query returned zero rows where rows were required
    #[error("Query for pollutant '{pollutant}' returned no rows")]
    EmptyResult { pollutant: String },

    /// Response body or cell value could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Arrow table construction failed
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a retry has a chance of succeeding
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Query { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<serde_yaml_ng::Error> for Error {
    fn from(value: serde_yaml_ng::Error) -> Self {
        Self::Config(value.to_string())
    }
}

/// Result type for airquality operations
pub type Result<T> = std::result::Result<T, Error>;
