//! Engine errors and their serializable form

use crate::descriptor::LifecyclePhase;
use crate::result::ReduceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid job graph or property values; raised before any row is read
    #[error("Configuration error in '{component}': {message}")]
    Configuration { component: String, message: String },

    #[error("Unknown component descriptor: {0}")]
    UnknownDescriptor(String),

    #[error("{phase} of '{component}' failed: {message}")]
    Lifecycle {
        component: String,
        phase: LifecyclePhase,
        message: String,
    },

    #[error("Component '{component}' failed on row {row_id}: {message}")]
    RowProcessing {
        component: String,
        row_id: u64,
        message: String,
    },

    #[error("Result of '{component}' could not be retrieved: {message}")]
    ResultRetrieval { component: String, message: String },

    #[error("Reduce error: {0}")]
    Reduce(#[from] ReduceError),

    #[error("Datastore error: {0}")]
    Datastore(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] tally_common::TallyError),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Job was cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Configuration { .. } | EngineError::UnknownDescriptor(_) => {
                ErrorKind::Configuration
            },
            EngineError::Lifecycle { .. } => ErrorKind::Lifecycle,
            EngineError::RowProcessing { .. } | EngineError::ResultRetrieval { .. } => {
                ErrorKind::RowProcessing
            },
            EngineError::Reduce(_) => ErrorKind::Reduce,
            EngineError::Datastore(_) | EngineError::Common(_) => ErrorKind::Datastore,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::Serialization(_) | EngineError::State(_) => ErrorKind::Internal,
        }
    }

    /// Component the error is attributed to, if any
    pub fn component(&self) -> Option<&str> {
        match self {
            EngineError::Configuration { component, .. }
            | EngineError::Lifecycle { component, .. }
            | EngineError::RowProcessing { component, .. }
            | EngineError::ResultRetrieval { component, .. } => Some(component),
            EngineError::UnknownDescriptor(name) => Some(name),
            _ => None,
        }
    }

    /// Re-attribute a descriptor-level error to a component key in a job
    pub fn attributed_to(mut self, key: &str) -> Self {
        match &mut self {
            EngineError::Configuration { component, .. }
            | EngineError::Lifecycle { component, .. }
            | EngineError::RowProcessing { component, .. }
            | EngineError::ResultRetrieval { component, .. } => *component = key.to_string(),
            _ => {},
        }
        self
    }
}

/// Category of a [`JobError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Lifecycle,
    RowProcessing,
    Datastore,
    Reduce,
    NotDistributable,
    Transport,
    Protocol,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Lifecycle => "lifecycle",
            ErrorKind::RowProcessing => "row processing",
            ErrorKind::Datastore => "datastore",
            ErrorKind::Reduce => "reduce",
            ErrorKind::NotDistributable => "not distributable",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// An error as reported in an analysis outcome or sent over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub division: Option<usize>,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            component: None,
            division: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Job was cancelled")
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Tag the error with a division index unless it already carries one
    pub fn in_division(mut self, index: usize) -> Self {
        self.division.get_or_insert(index);
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(division) = self.division {
            write!(f, "[division {}] ", division)?;
        }
        write!(f, "{} error", self.kind)?;
        if let Some(component) = &self.component {
            write!(f, " in '{}'", component)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl From<&EngineError> for JobError {
    fn from(err: &EngineError) -> Self {
        JobError {
            kind: err.kind(),
            message: err.to_string(),
            component: err.component().map(str::to_string),
            division: None,
        }
    }
}

impl From<EngineError> for JobError {
    fn from(err: EngineError) -> Self {
        JobError::from(&err)
    }
}
