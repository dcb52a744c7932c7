use thiserror::Error;

pub type Result<T> = std::result::Result<T, OsmError>;

#[derive(Debug, Error)]
pub enum OsmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No Overpass endpoints configured")]
    NoEndpoints,
}

impl OsmError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, OsmError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for OsmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            OsmError::Parse(err.to_string())
        } else {
            OsmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for OsmError {
    fn from(err: serde_json::Error) -> Self {
        OsmError::Parse(err.to_string())
    }
}
