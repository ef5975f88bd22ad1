//! Cluster managers: where divisions run
//!
//! [`ClusterManager::dispatch_job`] starts one division and hands back its
//! [`AnalysisResultFuture`] without waiting for it. The HTTP implementation
//! lives in [`crate::http`]; [`VirtualClusterManager`] runs divisions
//! in-process.

use crate::compute::RowProcessingFunction;
use crate::division::{DivisionContext, FixedDivisionsCountJobDivisionManager, JobDivisionManager};
use crate::error::DispatchError;
use std::sync::Arc;
use tally_engine::pipeline::PartitionOutcome;
use tally_engine::runner::AnalysisEnvironment;
use tally_engine::source::RowSource;
use tally_engine::wire::WirePayload;
use tally_engine::{AnalysisJob, AnalysisOutcome, AnalysisResultFuture, ErrorKind, JobError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub trait ClusterManager: Send + Sync {
    fn division_manager(&self) -> &dyn JobDivisionManager;

    fn worker_count(&self) -> usize;

    /// Start one division of a job
    ///
    /// Must be called within a Tokio runtime. An `Err` means the division
    /// could not be sent at all; failures after that resolve the future.
    fn dispatch_job(
        &self,
        job: &AnalysisJob,
        context: DivisionContext,
    ) -> Result<AnalysisResultFuture, DispatchError>;

    /// Where a division is sent, for reporting
    fn endpoint_for(&self, _context: DivisionContext) -> Option<String> {
        None
    }
}

/// Runs every division on this node, on blocking threads
///
/// Outcomes make the same wire round trip a remote worker's response would.
pub struct VirtualClusterManager {
    env: AnalysisEnvironment,
    source: Arc<dyn RowSource>,
    workers: usize,
    division_manager: FixedDivisionsCountJobDivisionManager,
}

impl VirtualClusterManager {
    pub fn new(env: AnalysisEnvironment, source: Arc<dyn RowSource>, workers: usize) -> Self {
        Self {
            env,
            source,
            workers: workers.max(1),
            division_manager: FixedDivisionsCountJobDivisionManager::per_worker(),
        }
    }

    pub fn with_division_manager(mut self, division_manager: FixedDivisionsCountJobDivisionManager) -> Self {
        self.division_manager = division_manager;
        self
    }
}

impl ClusterManager for VirtualClusterManager {
    fn division_manager(&self) -> &dyn JobDivisionManager {
        &self.division_manager
    }

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn dispatch_job(
        &self,
        job: &AnalysisJob,
        context: DivisionContext,
    ) -> Result<AnalysisResultFuture, DispatchError> {
        let cancel = CancellationToken::new();
        let (sender, future) = AnalysisResultFuture::channel(cancel.clone());
        let function = RowProcessingFunction::new(self.env.clone(), job.clone());
        let source = Arc::clone(&self.source);
        let index = context.index;

        info!(division = index, of = context.count, range = ?job.row_range, "Dispatching virtual division");
        tokio::task::spawn_blocking(move || {
            let partition = match source.open(function.job().row_range) {
                Ok(rows) => function.call(index, rows, &cancel),
                Err(e) => {
                    let mut failed = PartitionOutcome::failed(&e);
                    failed.errors = failed.errors.into_iter().map(|e| e.in_division(index)).collect();
                    failed
                },
            };
            sender.complete(through_wire(partition.into_outcome(), index));
        });
        Ok(future)
    }

    fn endpoint_for(&self, context: DivisionContext) -> Option<String> {
        Some(format!("virtual://{}", context.index % self.workers))
    }
}

fn through_wire(outcome: AnalysisOutcome, index: usize) -> AnalysisOutcome {
    let decoded = WirePayload::from_outcome(&outcome)
        .encode()
        .and_then(|bytes| {
            debug!(division = index, bytes = bytes.len(), "Encoded division payload");
            WirePayload::decode(&bytes)
        });
    match decoded {
        Ok(payload) => payload.into_outcome(),
        Err(e) => AnalysisOutcome::failed(vec![
            JobError::new(ErrorKind::Protocol, e.to_string()).in_division(index)
        ]),
    }
}
