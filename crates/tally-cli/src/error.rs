//! Error types for the Tally CLI
//!
//! Messages are shown to the user as is, so they say what to check.

use tally_cluster::DispatchError;
use tally_engine::EngineError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Required file is missing
    #[error("File not found: '{0}'. Verify the file path exists and you have read permissions.")]
    FileNotFound(String),

    /// Job file is not a valid job definition
    #[error("Invalid job definition '{path}': {message}")]
    InvalidJob { path: String, message: String },

    /// The analysis ran but did not succeed; the outcome was already printed
    #[error("Analysis {status} with {errors} error(s)")]
    JobFailed { status: String, errors: usize },

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Analysis error: {0}")]
    Engine(#[from] EngineError),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions.")]
    Io(#[from] std::io::Error),

    #[error("Failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CliError::FileNotFound("job.json".into());
        assert!(err.to_string().contains("job.json"));

        let err = CliError::JobFailed {
            status: "failed".into(),
            errors: 2,
        };
        assert_eq!(err.to_string(), "Analysis failed with 2 error(s)");

        let err = CliError::from(DispatchError::NoWorkers);
        assert!(err.to_string().contains("No worker endpoints"));
    }
}
