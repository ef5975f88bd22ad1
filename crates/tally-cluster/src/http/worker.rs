//! Worker endpoint: runs divisions sent by a coordinator

use super::{
    ACTION_CANCEL, ACTION_RUN, HEALTH_PATH, HTTP_PARAM_ACTION, HTTP_PARAM_JOB_DEF,
    HTTP_PARAM_SLAVE_JOB_ID, WORKER_PATH,
};
use crate::error::WorkerError;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tally_engine::runner::{execute_partition, AnalysisEnvironment};
use tally_engine::source::RowSource;
use tally_engine::wire::WirePayload;
use tally_engine::{AnalysisJob, AnalysisResultFuture};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Hook to adjust or reject a job before a worker runs it
#[async_trait]
pub trait JobInterceptor: Send + Sync {
    async fn intercept(&self, job: AnalysisJob) -> anyhow::Result<AnalysisJob>;
}

/// Runs divisions over its own row source and tracks them by job id
#[derive(Clone)]
pub struct WorkerService {
    env: AnalysisEnvironment,
    source: Arc<dyn RowSource>,
    interceptor: Option<Arc<dyn JobInterceptor>>,
    running: Arc<DashMap<String, AnalysisResultFuture>>,
}

impl WorkerService {
    pub fn new(env: AnalysisEnvironment, source: Arc<dyn RowSource>) -> Self {
        Self {
            env,
            source,
            interceptor: None,
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn JobInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn running_jobs(&self) -> usize {
        self.running.len()
    }

    /// Parse a job definition and pass it through the interceptor
    pub async fn read_job(&self, job_def: &[u8]) -> Result<AnalysisJob, WorkerError> {
        let job = AnalysisJob::from_slice(job_def)
            .map_err(|e| WorkerError::BadRequest(format!("Invalid job definition: {}", e)))?;
        match &self.interceptor {
            Some(interceptor) => interceptor
                .intercept(job)
                .await
                .map_err(|e| WorkerError::Rejected(e.to_string())),
            None => Ok(job),
        }
    }

    /// Start a division, registered under `job_id` until its result is served
    ///
    /// Non-distributed lifecycle methods are skipped.
    pub fn run_job(&self, job: AnalysisJob, job_id: Option<&str>) -> AnalysisResultFuture {
        let cancel = CancellationToken::new();
        let (sender, future) = AnalysisResultFuture::channel(cancel.clone());
        if let Some(id) = job_id {
            self.running.insert(id.to_string(), future.clone());
        }

        let env = self.env.clone();
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || {
            let outcome = execute_partition(&env, &job, source.as_ref(), false, &cancel);
            sender.complete(outcome.into_outcome());
        });
        future
    }

    /// Wait for a division and encode its outcome as a wire payload
    pub async fn serialize_result(
        &self,
        future: &AnalysisResultFuture,
        job_id: Option<&str>,
    ) -> Result<Vec<u8>, WorkerError> {
        let outcome = future.outcome().await;
        if let Some(id) = job_id {
            self.running.remove(id);
        }
        WirePayload::from_outcome(&outcome)
            .encode()
            .map_err(|e| WorkerError::Internal(e.to_string()))
    }

    /// False when the id is unknown or the division already finished
    pub fn cancel_job(&self, job_id: &str) -> bool {
        match self.running.remove(job_id) {
            Some((_, future)) => {
                info!(job_id, "Cancelling job");
                future.cancel()
            },
            None => {
                warn!(job_id, "Cancel requested for unknown job");
                false
            },
        }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route(WORKER_PATH, post(handle_worker_request))
            .route(HEALTH_PATH, get(health))
            .layer(super::tracing_layer())
            .with_state(self)
    }
}

/// Cancels a division whose request went away before the result was served
struct RunGuard {
    running: Arc<DashMap<String, AnalysisResultFuture>>,
    job_id: Option<String>,
    future: AnalysisResultFuture,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(id) = &self.job_id {
            self.running.remove(id);
        }
        if !self.future.is_done() {
            warn!(job_id = ?self.job_id, "Request dropped, cancelling job");
            self.future.cancel();
        }
    }
}

fn parse_fields(raw: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(raw).into_owned().collect()
}

async fn handle_worker_request(
    State(service): State<WorkerService>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WorkerError> {
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));

    let mut fields = query.as_deref().map(|q| parse_fields(q.as_bytes())).unwrap_or_default();
    if is_form {
        fields.extend(parse_fields(&body));
    }

    let job_id = fields.get(HTTP_PARAM_SLAVE_JOB_ID).cloned();
    let action = fields.get(HTTP_PARAM_ACTION).map_or(ACTION_RUN, String::as_str);

    match action {
        ACTION_CANCEL => {
            let job_id = job_id.ok_or_else(|| {
                WorkerError::BadRequest(format!("{} is required to cancel", HTTP_PARAM_SLAVE_JOB_ID))
            })?;
            let cancelled = service.cancel_job(&job_id);
            Ok(Json(json!({ "cancelled": cancelled })).into_response())
        },
        ACTION_RUN => {
            let job_def = match fields.get(HTTP_PARAM_JOB_DEF) {
                Some(def) => def.as_bytes().to_vec(),
                None if !is_form => body.to_vec(),
                None => {
                    return Err(WorkerError::BadRequest(format!("Missing {}", HTTP_PARAM_JOB_DEF)))
                },
            };
            let job = service.read_job(&job_def).await?;
            info!(job_id = ?job_id, range = ?job.row_range, "Running job");

            let future = service.run_job(job, job_id.as_deref());
            let _guard = RunGuard {
                running: Arc::clone(&service.running),
                job_id: job_id.clone(),
                future: future.clone(),
            };
            let payload = service.serialize_result(&future, job_id.as_deref()).await?;
            Ok(([(header::CONTENT_TYPE, "application/json")], payload).into_response())
        },
        other => Err(WorkerError::BadRequest(format!("Unknown action '{}'", other))),
    }
}

async fn health(State(service): State<WorkerService>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "running_jobs": service.running_jobs(),
    }))
}
