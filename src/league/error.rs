use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to (de)serialize cached record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Upstream unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),

    #[error("Upstream request timed out")]
    Timeout,

    #[error("Upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Upstream reported error: {0}")]
    Reported(String),

    #[error("Failed to parse upstream response: {0}")]
    Parse(String),
}

impl ApiError {
    /// Errors worth retrying within the same run
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Unavailable(_) | ApiError::Timeout => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            ApiError::Reported(_) | ApiError::Parse(_) => false,
        }
    }
}
