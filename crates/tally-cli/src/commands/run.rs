//! `tally run` command implementation
//!
//! Runs the whole job on this machine with every lifecycle method enabled.

use super::{await_outcome, load_job, open_source, print_outcome};
use crate::error::Result;
use std::path::Path;
use std::sync::Arc;
use tally_engine::{AnalysisEnvironment, LocalAnalysisRunner};
use tracing::info;

pub async fn run(job: &Path, data: &Path, pretty: bool) -> Result<()> {
    let job = load_job(job)?;
    let source = open_source(data)?;
    info!(data = %data.display(), "Running job locally");

    let runner = LocalAnalysisRunner::new(AnalysisEnvironment::with_builtin());
    let future = runner.run(job, Arc::new(source));
    let outcome = await_outcome(&future).await;
    print_outcome(&outcome, pretty)
}
