use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Content missing: {missing} of {requested} items not found")]
    ContentMissing { missing: usize, requested: usize },

    #[error("Session manager is shut down")]
    ShutDown,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Store layer errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Network request errors
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Feed server unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request task failed: {message}")]
    TaskFailed { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RequestError {
    /// Numeric code reported to the scheduler on failure.
    pub fn code(&self) -> u16 {
        match self {
            RequestError::Api { status, .. } => *status,
            RequestError::Timeout { .. } => 408,
            RequestError::Unavailable { .. } => 503,
            RequestError::Cancelled => 499,
            RequestError::InvalidResponse { .. }
            | RequestError::TaskFailed { .. }
            | RequestError::Http(_) => 0,
        }
    }
}

/// Result type alias for application errors
pub type FeedResult<T> = Result<T, FeedError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for network requests
pub type RequestResult<T> = Result<T, RequestError>;
