//! Running a job on this node
//!
//! [`execute_partition`] is the synchronous unit every runner is built on:
//! build a pipeline, read a row range, close, collect. Workers call it with
//! `include_non_distributed_tasks = false`; [`LocalAnalysisRunner`] runs the
//! whole job with it on a blocking thread.

use crate::descriptor::DescriptorRegistry;
use crate::future::{AnalysisOutcome, AnalysisResultFuture};
use crate::injection::{InjectionManager, ServiceRegistry};
use crate::job::AnalysisJob;
use crate::lifecycle::LifecycleHelper;
use crate::pipeline::{ConsumeRowHandler, PartitionOutcome, PipelineOptions};
use crate::source::RowSource;
use std::borrow::Cow;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span};

/// Component types and services a job runs against
#[derive(Clone)]
pub struct AnalysisEnvironment {
    registry: Arc<DescriptorRegistry>,
    injection: Arc<dyn InjectionManager>,
}

impl AnalysisEnvironment {
    pub fn new(registry: DescriptorRegistry, injection: Arc<dyn InjectionManager>) -> Self {
        Self {
            registry: Arc::new(registry),
            injection,
        }
    }

    /// Built-in components and no services
    pub fn with_builtin() -> Self {
        Self::new(DescriptorRegistry::with_builtin(), Arc::new(ServiceRegistry::new()))
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    pub fn injection(&self) -> Arc<dyn InjectionManager> {
        Arc::clone(&self.injection)
    }

    pub fn lifecycle(&self, include_non_distributed_tasks: bool) -> Arc<LifecycleHelper> {
        Arc::new(LifecycleHelper::new(self.injection(), include_non_distributed_tasks))
    }
}

impl std::fmt::Debug for AnalysisEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisEnvironment")
            .field("descriptors", &self.registry.len())
            .finish()
    }
}

/// Run `job` over the rows of `source` within the job's row range
///
/// A job without source columns takes them from the source.
pub fn execute_partition(
    env: &AnalysisEnvironment,
    job: &AnalysisJob,
    source: &dyn RowSource,
    include_non_distributed_tasks: bool,
    cancel: &CancellationToken,
) -> PartitionOutcome {
    let span = info_span!("partition", job = job.name.as_deref().unwrap_or(""), range = ?job.row_range);
    let _guard = span.enter();

    let job = if job.source_columns.is_empty() {
        match source.columns() {
            Ok(columns) => Cow::Owned(AnalysisJob {
                source_columns: columns,
                ..job.clone()
            }),
            Err(e) => return PartitionOutcome::failed(&e),
        }
    } else {
        Cow::Borrowed(job)
    };

    let lifecycle = env.lifecycle(include_non_distributed_tasks);
    let mut handler = match ConsumeRowHandler::build(
        &job,
        env.registry(),
        lifecycle,
        PipelineOptions::default(),
    ) {
        Ok(handler) => handler,
        Err(e) => {
            error!(error = %e, "Failed to build pipeline");
            return PartitionOutcome::failed(&e);
        },
    };

    let rows = match source.open(job.row_range) {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "Failed to open row source");
            let _ = handler.close(false);
            return PartitionOutcome::failed(&e);
        },
    };

    let outcome = handler.run_rows(rows, cancel);
    info!(status = ?outcome.status, rows = outcome.rows_processed, "Partition finished");
    outcome
}

/// Runs whole jobs on this node
#[derive(Debug, Clone)]
pub struct LocalAnalysisRunner {
    env: AnalysisEnvironment,
}

impl LocalAnalysisRunner {
    pub fn new(env: AnalysisEnvironment) -> Self {
        Self { env }
    }

    pub fn environment(&self) -> &AnalysisEnvironment {
        &self.env
    }

    /// Start the job on a blocking thread; must be called within a Tokio
    /// runtime
    pub fn run(&self, job: AnalysisJob, source: Arc<dyn RowSource>) -> AnalysisResultFuture {
        let cancel = CancellationToken::new();
        let (sender, future) = AnalysisResultFuture::channel(cancel.clone());
        let env = self.env.clone();

        tokio::task::spawn_blocking(move || {
            let outcome = execute_partition(&env, &job, source.as_ref(), true, &cancel);
            sender.complete(outcome.into_outcome());
        });
        future
    }

    pub fn run_blocking(&self, job: &AnalysisJob, source: &dyn RowSource) -> AnalysisOutcome {
        execute_partition(&self.env, job, source, true, &CancellationToken::new()).into_outcome()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::future::JobStatus;
    use crate::job::{ComponentJob, RowRange};
    use crate::result::{AnalyzerResult, NumberResult};
    use crate::source::{CsvRowSource, InMemoryRowSource};
    use crate::value::Value;
    use std::io::Write;

    fn cities() -> InMemoryRowSource {
        InMemoryRowSource::from_values(
            ["city"],
            ["Oslo", "Bergen", "Oslo", "Oslo"].iter().map(|c| vec![Value::from(*c)]).collect(),
        )
    }

    fn count_job() -> AnalysisJob {
        AnalysisJob::new(["city"]).component(ComponentJob::new("row-count").key("rows"))
    }

    #[test]
    fn test_run_blocking() {
        let runner = LocalAnalysisRunner::new(AnalysisEnvironment::with_builtin());
        let outcome = runner.run_blocking(&count_job(), &cities());
        assert!(outcome.is_successful());
        assert_eq!(
            outcome.result.get("rows"),
            Some(&AnalyzerResult::Number(NumberResult::new(4_i64)))
        );
    }

    #[test]
    fn test_partition_reads_its_row_range() {
        let env = AnalysisEnvironment::with_builtin();
        let job = count_job().for_division(Some(RowRange::new(2, Some(2))));
        let outcome = execute_partition(&env, &job, &cities(), false, &CancellationToken::new());
        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert_eq!(outcome.rows_processed, 2);
    }

    #[test]
    fn test_source_columns_default_to_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "city,zip").unwrap();
        writeln!(file, "Oslo,0150").unwrap();
        writeln!(file, "Bergen,5003").unwrap();

        let job = AnalysisJob::new(Vec::<String>::new())
            .component(ComponentJob::new("value-distribution").key("cities").property("column", "city"));
        let outcome = LocalAnalysisRunner::new(AnalysisEnvironment::with_builtin())
            .run_blocking(&job, &CsvRowSource::new(file.path()));

        let Some(AnalyzerResult::ValueDistribution(dist)) = outcome.result.get("cities") else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(dist.total_count, 2);
    }

    #[test]
    fn test_invalid_job_fails_without_reading() {
        let env = AnalysisEnvironment::with_builtin();
        let job = AnalysisJob::new(["city"]).component(ComponentJob::new("levenshtein"));
        let outcome = execute_partition(&env, &job, &cities(), true, &CancellationToken::new());
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.errors[0].kind, ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_run_completes_future() {
        let runner = LocalAnalysisRunner::new(AnalysisEnvironment::with_builtin());
        let future = runner.run(count_job(), Arc::new(cities()));
        let outcome = future.outcome().await;
        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert_eq!(outcome.result.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_stays_cancelled() {
        let runner = LocalAnalysisRunner::new(AnalysisEnvironment::with_builtin());
        let future = runner.run(count_job(), Arc::new(cities()));
        // the blocking task may win the race; the first terminal state sticks
        let expected = if future.cancel() {
            JobStatus::Cancelled
        } else {
            JobStatus::Succeeded
        };
        assert_eq!(future.outcome().await.status, expected);
        assert!(future.cancellation_token().is_cancelled());
    }
}
