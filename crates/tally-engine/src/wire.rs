//! Versioned payload returned by workers
//!
//! ```json
//! {"version": 1, "type": "result", "results": {"rows": {"kind": "number", "value": 12}}}
//! {"version": 1, "type": "errors", "errors": [{"kind": "row_processing", "message": "..."}]}
//! ```

use crate::error::{ErrorKind, JobError};
use crate::future::{AnalysisOutcome, AnalysisResult, JobStatus};
use crate::result::AnalyzerResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const WIRE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported payload version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireBody {
    Result {
        results: BTreeMap<String, AnalyzerResult>,
    },
    Errors {
        errors: Vec<JobError>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePayload {
    pub version: u32,
    #[serde(flatten)]
    pub body: WireBody,
}

impl WirePayload {
    pub fn result(results: BTreeMap<String, AnalyzerResult>) -> Self {
        Self {
            version: WIRE_VERSION,
            body: WireBody::Result { results },
        }
    }

    pub fn errors(errors: Vec<JobError>) -> Self {
        Self {
            version: WIRE_VERSION,
            body: WireBody::Errors { errors },
        }
    }

    /// Successful outcomes become a result payload, everything else an
    /// error list (never empty)
    pub fn from_outcome(outcome: &AnalysisOutcome) -> Self {
        match outcome.status {
            JobStatus::Succeeded => Self::result(outcome.result.results.clone()),
            JobStatus::Cancelled if outcome.errors.is_empty() => {
                Self::errors(vec![JobError::cancelled()])
            },
            _ if outcome.errors.is_empty() => Self::errors(vec![JobError::new(
                ErrorKind::Internal,
                format!("analysis ended with status {:?} and no errors", outcome.status),
            )]),
            _ => Self::errors(outcome.errors.clone()),
        }
    }

    pub fn into_outcome(self) -> AnalysisOutcome {
        match self.body {
            WireBody::Result { results } => AnalysisOutcome::succeeded(AnalysisResult::new(results)),
            WireBody::Errors { errors } => {
                if errors.iter().all(|e| e.kind == ErrorKind::Cancelled) && !errors.is_empty() {
                    AnalysisOutcome {
                        errors,
                        ..AnalysisOutcome::cancelled()
                    }
                } else {
                    AnalysisOutcome::failed(errors)
                }
            },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let payload: WirePayload = serde_json::from_slice(bytes)?;
        if payload.version != WIRE_VERSION {
            return Err(WireError::UnsupportedVersion {
                found: payload.version,
                expected: WIRE_VERSION,
            });
        }
        Ok(payload)
    }
}
