//! Tally cluster
//!
//! Runs one [`AnalysisJob`](tally_engine::AnalysisJob) across several
//! workers and reduces their partial results into a single outcome.
//!
//! # Flow
//!
//! 1. [`DistributedAnalysisRunner`] rejects jobs with non-distributable
//!    components and initializes the job's components locally
//! 2. A [`JobDivisionManager`] decides the number of divisions; each division
//!    gets a contiguous row range
//! 3. A [`ClusterManager`] dispatches every division: over HTTP to
//!    `tally-worker` processes ([`http::HttpClusterManager`]) or in-process
//!    ([`VirtualClusterManager`])
//! 4. [`DistributedResultReducer`] merges the division results per component
//!    key and closes the local components
//!
//! [`compute::RowProcessingFunction`] exposes the per-partition step for
//! compute engines that partition rows themselves.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod compute;
pub mod config;
pub mod division;
pub mod error;
pub mod http;
pub mod manager;
pub mod reducer;
pub mod runner;

pub use config::ClusterConfig;
pub use division::{DivisionContext, FixedDivisionsCountJobDivisionManager, JobDivisionManager};
pub use error::{DispatchError, WorkerError};
pub use manager::{ClusterManager, VirtualClusterManager};
pub use reducer::{DistributedResultReducer, DivisionOutcome};
pub use runner::DistributedAnalysisRunner;
