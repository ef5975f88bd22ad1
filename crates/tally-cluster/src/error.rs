//! Dispatch and worker error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tally_engine::{EngineError, ErrorKind, JobError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// Raised before any division is sent
    #[error("Component '{component}' ({descriptor}) cannot run distributed")]
    NotDistributable { component: String, descriptor: String },

    #[error("No worker endpoints configured")]
    NoWorkers,

    #[error("Invalid worker endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Worker {endpoint} answered with HTTP status {status}")]
    HttpStatus { endpoint: String, status: u16 },

    #[error("Unreadable response from {endpoint}: {message}")]
    Protocol { endpoint: String, message: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::NotDistributable { .. } => ErrorKind::NotDistributable,
            DispatchError::NoWorkers | DispatchError::InvalidEndpoint { .. } => {
                ErrorKind::Configuration
            },
            DispatchError::Transport { .. } | DispatchError::HttpStatus { .. } => ErrorKind::Transport,
            DispatchError::Protocol { .. } => ErrorKind::Protocol,
            DispatchError::Engine(e) => e.kind(),
            DispatchError::Task(_) => ErrorKind::Internal,
        }
    }
}

impl From<&DispatchError> for JobError {
    fn from(err: &DispatchError) -> Self {
        let job_error = JobError::new(err.kind(), err.to_string());
        match err {
            DispatchError::NotDistributable { component, .. } => job_error.with_component(component),
            DispatchError::Engine(e) => JobError::from(e),
            _ => job_error,
        }
    }
}

/// Errors answered by the worker endpoint
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rejected job: {0}")]
    Rejected(String),

    #[error("Internal worker error: {0}")]
    Internal(String),
}

impl IntoResponse for WorkerError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            WorkerError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            WorkerError::Rejected(message) => {
                tracing::warn!("Rejected job: {}", message);
                (StatusCode::BAD_REQUEST, message)
            },
            WorkerError::Internal(message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            },
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_kinds() {
        let err = DispatchError::HttpStatus {
            endpoint: "http://w1/tally/worker".into(),
            status: 503,
        };
        let job_error = JobError::from(&err);
        assert_eq!(job_error.kind, ErrorKind::Transport);
        assert!(job_error.message.contains("503"));

        let err = DispatchError::NotDistributable {
            component: "3".into(),
            descriptor: "first-value".into(),
        };
        assert_eq!(JobError::from(&err).component.as_deref(), Some("3"));
    }

    #[test]
    fn test_worker_error_status() {
        let response = WorkerError::BadRequest("missing job-def".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = WorkerError::Internal("boom".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
