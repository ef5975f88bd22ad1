//! HTTP transport between a coordinator and its workers
//!
//! A division is sent as an urlencoded form POST to the worker path:
//!
//! | field          | value                                  |
//! |----------------|----------------------------------------|
//! | `slave-job-id` | id the coordinator assigned the division |
//! | `action`       | `run` (default) or `cancel`            |
//! | `job-def`      | the division's job as JSON             |
//!
//! A run is answered with a [`tally_engine::wire::WirePayload`]; a cancel
//! with `{"cancelled": bool}`.

mod client;
mod worker;

pub use client::HttpClusterManager;
pub use worker::{JobInterceptor, WorkerService};

use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

pub const WORKER_PATH: &str = "/tally/worker";
pub const HEALTH_PATH: &str = "/health";

pub const HTTP_PARAM_SLAVE_JOB_ID: &str = "slave-job-id";
pub const HTTP_PARAM_ACTION: &str = "action";
pub const HTTP_PARAM_JOB_DEF: &str = "job-def";

pub const ACTION_RUN: &str = "run";
pub const ACTION_CANCEL: &str = "cancel";

/// Request logging for the worker router
pub fn tracing_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(tower_http::LatencyUnit::Micros),
        )
}
