//! Command implementations

pub mod components;
pub mod dispatch;
pub mod run;
pub mod validate;

use crate::error::{CliError, Result};
use std::path::Path;
use std::sync::Arc;
use tally_engine::source::CsvRowSource;
use tally_engine::{AnalysisJob, AnalysisOutcome, AnalysisResultFuture};
use tracing::{debug, warn};

/// Read and parse a job definition file
pub fn load_job(path: &Path) -> Result<AnalysisJob> {
    if !path.exists() {
        return Err(CliError::FileNotFound(path.display().to_string()));
    }
    let json = std::fs::read_to_string(path)?;
    let job = AnalysisJob::from_json(&json).map_err(|e| CliError::InvalidJob {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    debug!(path = %path.display(), components = job.components.len(), "Loaded job");
    Ok(job)
}

pub fn open_source(path: &Path) -> Result<CsvRowSource> {
    if !path.exists() {
        return Err(CliError::FileNotFound(path.display().to_string()));
    }
    Ok(CsvRowSource::new(path))
}

/// Wait for the outcome; Ctrl+C cancels the analysis
pub async fn await_outcome(future: &AnalysisResultFuture) -> Arc<AnalysisOutcome> {
    tokio::select! {
        outcome = future.outcome() => return outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling analysis");
            future.cancel();
        },
    }
    future.outcome().await
}

/// Print the outcome as JSON; an unsuccessful outcome becomes an error
pub fn print_outcome(outcome: &AnalysisOutcome, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(outcome)?
    } else {
        serde_json::to_string(outcome)?
    };
    println!("{}", json);

    if outcome.is_successful() {
        Ok(())
    } else {
        Err(CliError::JobFailed {
            status: format!("{:?}", outcome.status).to_lowercase(),
            errors: outcome.errors.len(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tally_engine::JobError;

    #[test]
    fn test_load_job_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(load_job(&missing), Err(CliError::FileNotFound(_))));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{\"components\": 3}").unwrap();
        assert!(matches!(load_job(&broken), Err(CliError::InvalidJob { .. })));
    }

    #[test]
    fn test_failed_outcome_is_an_error() {
        let outcome = AnalysisOutcome::failed(vec![JobError::cancelled(), JobError::cancelled()]);
        match print_outcome(&outcome, false) {
            Err(CliError::JobFailed { status, errors }) => {
                assert_eq!(status, "failed");
                assert_eq!(errors, 2);
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
