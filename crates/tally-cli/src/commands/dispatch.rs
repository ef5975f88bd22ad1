//! `tally dispatch` command implementation

use super::{await_outcome, load_job, open_source, print_outcome};
use crate::error::Result;
use std::path::Path;
use std::sync::Arc;
use tally_cluster::config::{DispatcherConfig, DEFAULT_POOL_MAX_IDLE_PER_HOST};
use tally_cluster::http::HttpClusterManager;
use tally_cluster::{
    ClusterManager, DistributedAnalysisRunner, FixedDivisionsCountJobDivisionManager,
    VirtualClusterManager,
};
use tally_engine::source::RowSource;
use tally_engine::AnalysisEnvironment;
use tracing::info;

/// Where divisions run
#[derive(Debug, Clone)]
pub enum Workers {
    Http { endpoints: Vec<String>, timeout_secs: Option<u64> },
    Local(usize),
}

pub async fn run(job: &Path, data: &Path, workers: Workers, divisions: Option<usize>, pretty: bool) -> Result<()> {
    let job = load_job(job)?;
    let source: Arc<dyn RowSource> = Arc::new(open_source(data)?);
    let env = AnalysisEnvironment::with_builtin();
    let division_manager = divisions.map_or_else(
        FixedDivisionsCountJobDivisionManager::per_worker,
        FixedDivisionsCountJobDivisionManager::new,
    );

    let cluster: Arc<dyn ClusterManager> = match workers {
        Workers::Http { endpoints, timeout_secs } => {
            let config = DispatcherConfig {
                endpoints,
                pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
                http_timeout_secs: timeout_secs,
            };
            Arc::new(HttpClusterManager::from_config(&config)?.with_division_manager(Arc::new(division_manager)))
        },
        Workers::Local(count) => Arc::new(
            VirtualClusterManager::new(env.clone(), Arc::clone(&source), count)
                .with_division_manager(division_manager),
        ),
    };
    info!(workers = cluster.worker_count(), data = %data.display(), "Dispatching job");

    let runner = DistributedAnalysisRunner::new(env, cluster, source);
    let future = runner.run(&job).await?;
    let outcome = await_outcome(&future).await;
    print_outcome(&outcome, pretty)
}
