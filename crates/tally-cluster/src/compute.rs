//! Task boundary for distributed compute frameworks
//!
//! A compute engine that partitions rows itself calls
//! [`RowProcessingFunction::call`] once per partition and folds the keyed
//! results with [`reduce_pair`].

use tally_engine::pipeline::{ConsumeRowHandler, PartitionOutcome, PipelineOptions};
use tally_engine::result;
use tally_engine::runner::AnalysisEnvironment;
use tally_engine::{AnalysisJob, EngineError, InputRow, NamedAnalyzerResult};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Runs the row processing pipeline of a job over one partition of rows
#[derive(Debug, Clone)]
pub struct RowProcessingFunction {
    env: AnalysisEnvironment,
    job: AnalysisJob,
}

impl RowProcessingFunction {
    pub fn new(env: AnalysisEnvironment, job: AnalysisJob) -> Self {
        Self { env, job }
    }

    pub fn job(&self) -> &AnalysisJob {
        &self.job
    }

    /// Process `rows` as partition `partition`; non-distributed lifecycle
    /// methods are skipped and errors are tagged with the partition
    pub fn call<I>(&self, partition: usize, rows: I, cancel: &CancellationToken) -> PartitionOutcome
    where
        I: IntoIterator<Item = tally_engine::Result<InputRow>>,
    {
        info!(partition, "Processing partition");
        let lifecycle = self.env.lifecycle(false);
        let mut outcome =
            match ConsumeRowHandler::build(&self.job, self.env.registry(), lifecycle, PipelineOptions::default()) {
                Ok(mut handler) => handler.run_rows(rows, cancel),
                Err(e) => {
                    error!(partition, error = %e, "Failed to build partition pipeline");
                    PartitionOutcome::failed(&e)
                },
            };

        outcome.errors = outcome
            .errors
            .into_iter()
            .map(|e| e.in_division(partition))
            .collect();
        info!(
            partition,
            status = ?outcome.status,
            rows = outcome.rows_processed,
            results = outcome.results.len(),
            "Partition processed"
        );
        outcome
    }
}

/// Merge two partial results of the same component
pub fn reduce_pair(
    first: &NamedAnalyzerResult,
    second: &NamedAnalyzerResult,
) -> Result<NamedAnalyzerResult, EngineError> {
    if first.key != second.key {
        return Err(EngineError::State(format!(
            "cannot reduce results of '{}' and '{}' together",
            first.key, second.key
        )));
    }
    let reduced = result::reduce_pair(&first.result, &second.result)?;
    Ok(NamedAnalyzerResult::new(first.key.clone(), reduced))
}
