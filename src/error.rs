use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Oracle error ({status}): {message}")]
    Oracle { status: u16, message: String },

    #[error("Invalid record at index {index}: {message}")]
    InvalidRecord { index: usize, message: String },

    #[error("Illegal state: {0}")]
    IllegalState(String),
}

impl PipelineError {
    /// Oracle-side failures that the next scheduled run is expected to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Http(_) | PipelineError::Oracle { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
