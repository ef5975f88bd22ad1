//! Error types shared across the Tally crates

use thiserror::Error;

/// Result type alias for shared Tally operations
pub type Result<T> = std::result::Result<T, TallyError>;

/// Errors that are not specific to the engine or the cluster layer
#[derive(Error, Debug)]
pub enum TallyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TallyError {
    pub fn config(message: impl Into<String>) -> Self {
        TallyError::Config(message.into())
    }
}
