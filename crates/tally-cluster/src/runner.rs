//! Running one job across a cluster

use crate::division::{plan_divisions, DivisionContext};
use crate::error::DispatchError;
use crate::manager::{ClusterManager, VirtualClusterManager};
use crate::reducer::{DistributedResultReducer, DivisionOutcome};
use futures::future::join_all;
use std::sync::Arc;
use tally_engine::pipeline::{ConsumeRowHandler, PipelineOptions};
use tally_engine::runner::AnalysisEnvironment;
use tally_engine::source::RowSource;
use tally_engine::{AnalysisJob, AnalysisResultFuture, JobError, RowRange};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Splits a job into divisions, dispatches them and reduces the results
///
/// Components are initialized on this node with their non-distributed
/// lifecycle methods included and closed when the job ends; the divisions
/// themselves skip those methods.
pub struct DistributedAnalysisRunner {
    env: AnalysisEnvironment,
    cluster: Arc<dyn ClusterManager>,
    source: Arc<dyn RowSource>,
}

struct Division {
    context: DivisionContext,
    endpoint: Option<String>,
    future: AnalysisResultFuture,
}

impl DistributedAnalysisRunner {
    pub fn new(env: AnalysisEnvironment, cluster: Arc<dyn ClusterManager>, source: Arc<dyn RowSource>) -> Self {
        Self { env, cluster, source }
    }

    /// Whether every component of `job` can run distributed
    pub fn is_distributable(&self, job: &AnalysisJob) -> bool {
        self.check_distributable(job).is_ok()
    }

    fn check_distributable(&self, job: &AnalysisJob) -> Result<(), DispatchError> {
        let found = job.non_distributable_components(self.env.registry())?;
        match found.into_iter().next() {
            Some((component, descriptor)) => Err(DispatchError::NotDistributable { component, descriptor }),
            None => Ok(()),
        }
    }

    /// Start a distributed run
    ///
    /// Fails without dispatching anything when the job is invalid or not
    /// distributable. Once the first division fails to dispatch, the
    /// remaining divisions are not sent and that error leads the outcome's
    /// error list.
    pub async fn run(&self, job: &AnalysisJob) -> Result<AnalysisResultFuture, DispatchError> {
        self.check_distributable(job)?;
        let (job, coordinator, expected_rows) = self.prepare(job.clone()).await?;
        let (cluster, plan): (Arc<dyn ClusterManager>, _) = if expected_rows == Some(0) {
            info!("Source has no rows, running a single local division");
            let local = VirtualClusterManager::new(self.env.clone(), Arc::clone(&self.source), 1);
            (Arc::new(local), vec![(DivisionContext::single(), Some(RowRange::new(1, None)))])
        } else {
            let count = self
                .cluster
                .division_manager()
                .division_count(self.cluster.worker_count(), expected_rows);
            (Arc::clone(&self.cluster), plan_divisions(count, expected_rows))
        };
        info!(
            job = job.name.as_deref().unwrap_or(""),
            divisions = plan.len(),
            workers = cluster.worker_count(),
            ?expected_rows,
            "Dispatching distributed job"
        );

        let planned = plan.len();
        let mut divisions = Vec::with_capacity(planned);
        let mut dispatch_errors = Vec::new();
        for (context, range) in plan {
            match cluster.dispatch_job(&job.for_division(range), context) {
                Ok(future) => divisions.push(Division {
                    context,
                    endpoint: cluster.endpoint_for(context),
                    future,
                }),
                Err(e) => {
                    error!(division = context.index, error = %e, "Failed to dispatch division");
                    dispatch_errors.push(JobError::from(&e).in_division(context.index));
                    break;
                },
            }
        }

        let reducer = DistributedResultReducer::new(planned).with_coordinator(coordinator);
        let cancel = CancellationToken::new();
        let (sender, future) = AnalysisResultFuture::channel(cancel.clone());
        tokio::spawn(async move {
            let finished = tokio::select! {
                outcomes = join_all(divisions.iter().map(|d| d.future.outcome())) => Some(outcomes),
                _ = cancel.cancelled() => None,
            };

            let outcome = match finished {
                Some(outcomes) => {
                    let settled: Vec<DivisionOutcome> = divisions
                        .iter()
                        .zip(outcomes)
                        .map(|(d, outcome)| DivisionOutcome {
                            context: d.context,
                            endpoint: d.endpoint.clone(),
                            outcome,
                        })
                        .collect();
                    reducer.reduce(&settled, dispatch_errors)
                },
                None => {
                    warn!(divisions = divisions.len(), "Cancelling distributed job");
                    for division in &divisions {
                        division.future.cancel();
                    }
                    let settled: Vec<DivisionOutcome> = divisions
                        .iter()
                        .filter_map(|d| {
                            d.future.try_outcome().map(|outcome| DivisionOutcome {
                                context: d.context,
                                endpoint: d.endpoint.clone(),
                                outcome,
                            })
                        })
                        .collect();
                    reducer.abort(&settled)
                },
            };
            sender.complete(outcome);
        });

        Ok(future)
    }

    /// Resolve source columns, initialize the coordinator's components and
    /// count the rows, on a blocking thread
    async fn prepare(&self, job: AnalysisJob) -> Result<(AnalysisJob, ConsumeRowHandler, Option<u64>), DispatchError> {
        let env = self.env.clone();
        let source = Arc::clone(&self.source);

        tokio::task::spawn_blocking(move || -> Result<_, DispatchError> {
            let job = if job.source_columns.is_empty() {
                AnalysisJob {
                    source_columns: source.columns()?,
                    ..job
                }
            } else {
                job
            };

            let mut coordinator =
                ConsumeRowHandler::build(&job, env.registry(), env.lifecycle(true), PipelineOptions::default())?;

            match source.expected_rows() {
                Ok(expected_rows) => Ok((job, coordinator, expected_rows)),
                Err(e) => {
                    let _ = coordinator.close(false);
                    Err(e.into())
                },
            }
        })
        .await?
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::division::{FixedDivisionsCountJobDivisionManager, JobDivisionManager};
    use crate::http::{HttpClusterManager, WORKER_PATH};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tally_engine::future::OutcomeSender;
    use tally_engine::result::{Number, NumberResult};
    use tally_engine::source::{InMemoryRowSource, RowIter};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use tally_engine::{AnalysisOutcome, AnalyzerResult, ComponentJob, ErrorKind, JobStatus, Value};

    fn source(rows: i64) -> Arc<dyn RowSource> {
        Arc::new(InMemoryRowSource::from_values(
            ["n"],
            (1..=rows).map(|n| vec![Value::Integer(n)]).collect(),
        ))
    }

    fn count_job() -> AnalysisJob {
        AnalysisJob::new(["n"]).component(ComponentJob::new("row-count").key("rows"))
    }

    fn runner(rows: i64, workers: usize) -> DistributedAnalysisRunner {
        let env = AnalysisEnvironment::with_builtin();
        let source = source(rows);
        let cluster = VirtualClusterManager::new(env.clone(), Arc::clone(&source), workers);
        DistributedAnalysisRunner::new(env, Arc::new(cluster), source)
    }

    #[tokio::test]
    async fn test_divisions_cover_every_row() {
        let outcome = runner(10, 3).run(&count_job()).await.unwrap().outcome().await;
        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert_eq!(outcome.divisions.len(), 3);
        assert_eq!(
            outcome.result.get("rows"),
            Some(&AnalyzerResult::Number(NumberResult::new(Number::Integer(10))))
        );
    }

    #[tokio::test]
    async fn test_empty_source_runs_one_local_division() {
        let outcome = runner(0, 4).run(&count_job()).await.unwrap().outcome().await;
        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert_eq!(outcome.divisions.len(), 1);
        assert_eq!(
            outcome.result.get("rows"),
            Some(&AnalyzerResult::Number(NumberResult::new(Number::Integer(0))))
        );
    }

    fn single_node_job() -> AnalysisJob {
        count_job().component(ComponentJob::new("first-value").property("column", "n"))
    }

    #[tokio::test]
    async fn test_not_distributable_job_is_rejected() {
        let runner = runner(10, 2);
        let job = single_node_job();
        assert!(!runner.is_distributable(&job));
        assert!(runner.is_distributable(&count_job()));
        assert!(matches!(runner.run(&job).await, Err(DispatchError::NotDistributable { .. })));
    }

    #[tokio::test]
    async fn test_not_distributable_job_sends_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(WORKER_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let cluster = HttpClusterManager::new([format!("{}{}", server.uri(), WORKER_PATH)]).unwrap();
        let runner = DistributedAnalysisRunner::new(AnalysisEnvironment::with_builtin(), Arc::new(cluster), source(10));

        let err = runner.run(&single_node_job()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotDistributable);
        server.verify().await;
    }

    /// Records the thread the row count is taken on
    struct ThreadRecordingSource {
        inner: Arc<dyn RowSource>,
        counted_on: std::sync::Mutex<Option<std::thread::ThreadId>>,
    }

    impl RowSource for ThreadRecordingSource {
        fn columns(&self) -> tally_engine::Result<Vec<String>> {
            self.inner.columns()
        }

        fn expected_rows(&self) -> tally_engine::Result<Option<u64>> {
            *self.counted_on.lock().unwrap() = Some(std::thread::current().id());
            self.inner.expected_rows()
        }

        fn open(&self, range: Option<RowRange>) -> tally_engine::Result<RowIter> {
            self.inner.open(range)
        }
    }

    #[tokio::test]
    async fn test_rows_are_counted_off_the_runtime_thread() {
        let env = AnalysisEnvironment::with_builtin();
        let source = Arc::new(ThreadRecordingSource {
            inner: source(6),
            counted_on: std::sync::Mutex::new(None),
        });
        let cluster = VirtualClusterManager::new(env.clone(), source.clone(), 2);
        let runner = DistributedAnalysisRunner::new(env, Arc::new(cluster), source.clone());

        let outcome = runner.run(&count_job()).await.unwrap().outcome().await;
        assert_eq!(outcome.status, JobStatus::Succeeded);
        let counted_on = source.counted_on.lock().unwrap().unwrap();
        assert_ne!(counted_on, std::thread::current().id());
    }

    #[tokio::test]
    async fn test_invalid_job_is_rejected_before_dispatch() {
        let job = AnalysisJob::new(["n"]).component(ComponentJob::new("value-distribution"));
        let err = runner(10, 2).run(&job).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    /// Fails to dispatch every division from `fail_from` on
    struct FlakyCluster {
        inner: VirtualClusterManager,
        fail_from: usize,
        attempts: AtomicUsize,
    }

    impl ClusterManager for FlakyCluster {
        fn division_manager(&self) -> &dyn JobDivisionManager {
            self.inner.division_manager()
        }

        fn worker_count(&self) -> usize {
            self.inner.worker_count()
        }

        fn dispatch_job(
            &self,
            job: &AnalysisJob,
            context: DivisionContext,
        ) -> Result<AnalysisResultFuture, DispatchError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if context.index >= self.fail_from {
                return Err(DispatchError::HttpStatus {
                    endpoint: "http://w2/tally/worker".into(),
                    status: 503,
                });
            }
            self.inner.dispatch_job(job, context)
        }
    }

    #[tokio::test]
    async fn test_dispatch_failure_stops_dispatching() {
        let env = AnalysisEnvironment::with_builtin();
        let source = source(12);
        let cluster = Arc::new(FlakyCluster {
            inner: VirtualClusterManager::new(env.clone(), Arc::clone(&source), 4),
            fail_from: 1,
            attempts: AtomicUsize::new(0),
        });
        let runner = DistributedAnalysisRunner::new(env, cluster.clone(), source);

        let outcome = runner.run(&count_job()).await.unwrap().outcome().await;
        assert_eq!(cluster.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.errors[0].kind, ErrorKind::Transport);
        assert_eq!(outcome.errors[0].division, Some(1));
        assert!(outcome.result.is_empty());
        assert_eq!(outcome.divisions.len(), 1);
    }

    /// Divisions that never finish on their own
    struct StuckCluster {
        division_manager: FixedDivisionsCountJobDivisionManager,
        tokens: std::sync::Mutex<Vec<CancellationToken>>,
        senders: std::sync::Mutex<Vec<OutcomeSender>>,
    }

    impl ClusterManager for StuckCluster {
        fn division_manager(&self) -> &dyn JobDivisionManager {
            &self.division_manager
        }

        fn worker_count(&self) -> usize {
            2
        }

        fn dispatch_job(
            &self,
            _job: &AnalysisJob,
            _context: DivisionContext,
        ) -> Result<AnalysisResultFuture, DispatchError> {
            let token = CancellationToken::new();
            self.tokens.lock().unwrap().push(token.clone());
            let (sender, future) = AnalysisResultFuture::channel(token);
            self.senders.lock().unwrap().push(sender);
            Ok(future)
        }
    }

    #[tokio::test]
    async fn test_cancel_reaches_every_division() {
        let env = AnalysisEnvironment::with_builtin();
        let cluster = Arc::new(StuckCluster {
            division_manager: FixedDivisionsCountJobDivisionManager::per_worker(),
            tokens: std::sync::Mutex::new(Vec::new()),
            senders: std::sync::Mutex::new(Vec::new()),
        });
        let runner = DistributedAnalysisRunner::new(env, cluster.clone(), source(10));

        let future = runner.run(&count_job()).await.unwrap();
        assert!(future.cancel());
        let outcome: Arc<AnalysisOutcome> = future.outcome().await;
        assert_eq!(outcome.status, JobStatus::Cancelled);

        for _ in 0..50 {
            if cluster.tokens.lock().unwrap().iter().all(CancellationToken::is_cancelled) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("division tokens were not cancelled");
    }
}
