use thiserror::Error;

/// Main error type for the auth store
#[derive(Error, Debug)]
pub enum StoreError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Session identifier is required for the {backend} backend")]
    MissingSession { backend: &'static str },

    #[error("Worker port is required")]
    MissingPort,

    #[error("Invalid table name: {0:?}")]
    InvalidTable(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Worker channel error: {0}")]
    Channel(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Worker rejected request: {0}")]
    WorkerRejected(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt record {id:?}: {detail}")]
    Corrupt { id: String, detail: String },

    // Retry errors
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// Wrap a decode failure for the record at `id` as a corruption error.
    pub fn corrupt(id: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            id: id.into(),
            detail: err.to_string(),
        }
    }
}

/// Result type alias for StoreError
pub type Result<T> = std::result::Result<T, StoreError>;
