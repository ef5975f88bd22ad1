//! Coordinator side: sends divisions to worker endpoints

use super::{
    ACTION_CANCEL, ACTION_RUN, HTTP_PARAM_ACTION, HTTP_PARAM_JOB_DEF, HTTP_PARAM_SLAVE_JOB_ID,
};
use crate::config::DispatcherConfig;
use crate::division::{DivisionContext, FixedDivisionsCountJobDivisionManager, JobDivisionManager};
use crate::error::DispatchError;
use crate::manager::ClusterManager;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tally_engine::wire::WirePayload;
use tally_engine::{AnalysisJob, AnalysisOutcome, AnalysisResultFuture, JobError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

/// Dispatches divisions round-robin over a fixed list of worker URLs
pub struct HttpClusterManager {
    client: Client,
    endpoints: Vec<Url>,
    division_manager: Arc<dyn JobDivisionManager>,
}

impl HttpClusterManager {
    pub fn new<I, S>(endpoints: I) -> Result<Self, DispatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = endpoints
            .into_iter()
            .map(|e| {
                let endpoint = e.as_ref();
                Url::parse(endpoint).map_err(|source| DispatchError::InvalidEndpoint {
                    endpoint: endpoint.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if endpoints.is_empty() {
            return Err(DispatchError::NoWorkers);
        }

        Ok(Self {
            client: Client::new(),
            endpoints,
            division_manager: Arc::new(FixedDivisionsCountJobDivisionManager::per_worker()),
        })
    }

    /// Endpoints and connection pool settings from configuration
    pub fn from_config(config: &DispatcherConfig) -> Result<Self, DispatchError> {
        let mut builder = Client::builder().pool_max_idle_per_host(config.pool_max_idle_per_host);
        if let Some(secs) = config.http_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|source| DispatchError::Transport {
            endpoint: "<client>".to_string(),
            source,
        })?;
        Ok(Self::new(&config.endpoints)?.with_client(client))
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_division_manager(mut self, division_manager: Arc<dyn JobDivisionManager>) -> Self {
        self.division_manager = division_manager;
        self
    }

    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }

    fn endpoint(&self, context: DivisionContext) -> &Url {
        // never empty, checked in `new`
        &self.endpoints[context.index % self.endpoints.len()]
    }
}

impl ClusterManager for HttpClusterManager {
    fn division_manager(&self) -> &dyn JobDivisionManager {
        self.division_manager.as_ref()
    }

    fn worker_count(&self) -> usize {
        self.endpoints.len()
    }

    fn dispatch_job(
        &self,
        job: &AnalysisJob,
        context: DivisionContext,
    ) -> Result<AnalysisResultFuture, DispatchError> {
        let endpoint = self.endpoint(context).clone();
        let job_def = job.to_json()?;
        let job_id = Uuid::new_v4().to_string();
        let index = context.index;

        let cancel = CancellationToken::new();
        let (sender, future) = AnalysisResultFuture::channel(cancel.clone());
        let client = self.client.clone();

        info!(
            division = index,
            of = context.count,
            %endpoint,
            %job_id,
            range = ?job.row_range,
            "Dispatching division"
        );
        tokio::spawn(async move {
            tokio::select! {
                result = run_division(&client, &endpoint, &job_id, &job_def) => {
                    let outcome = match result {
                        Ok(mut outcome) => {
                            outcome.errors = outcome.errors.into_iter().map(|e| e.in_division(index)).collect();
                            outcome
                        },
                        Err(e) => {
                            error!(division = index, error = %e, "Division failed");
                            AnalysisOutcome::failed(vec![JobError::from(&e).in_division(index)])
                        },
                    };
                    sender.complete(outcome);
                },
                _ = cancel.cancelled() => {
                    sender.complete(AnalysisOutcome::cancelled());
                    cancel_division(&client, &endpoint, &job_id).await;
                },
            }
        });
        Ok(future)
    }

    fn endpoint_for(&self, context: DivisionContext) -> Option<String> {
        Some(self.endpoint(context).to_string())
    }
}

async fn run_division(
    client: &Client,
    endpoint: &Url,
    job_id: &str,
    job_def: &str,
) -> Result<AnalysisOutcome, DispatchError> {
    let transport = |source: reqwest::Error| DispatchError::Transport {
        endpoint: endpoint.to_string(),
        source,
    };

    let response = client
        .post(endpoint.clone())
        .form(&[
            (HTTP_PARAM_SLAVE_JOB_ID, job_id),
            (HTTP_PARAM_ACTION, ACTION_RUN),
            (HTTP_PARAM_JOB_DEF, job_def),
        ])
        .send()
        .await
        .map_err(transport)?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(DispatchError::HttpStatus {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.bytes().await.map_err(transport)?;
    debug!(%endpoint, job_id, bytes = body.len(), "Received division payload");
    let payload = WirePayload::decode(&body).map_err(|e| DispatchError::Protocol {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })?;
    Ok(payload.into_outcome())
}

/// Best effort; the division is already cancelled locally
async fn cancel_division(client: &Client, endpoint: &Url, job_id: &str) {
    info!(%endpoint, job_id, "Sending cancel to worker");
    let result = client
        .post(endpoint.clone())
        .form(&[(HTTP_PARAM_SLAVE_JOB_ID, job_id), (HTTP_PARAM_ACTION, ACTION_CANCEL)])
        .send()
        .await;
    match result {
        Ok(response) if response.status().is_success() => {},
        Ok(response) => warn!(%endpoint, job_id, status = %response.status(), "Worker refused cancel"),
        Err(e) => warn!(%endpoint, job_id, error = %e, "Failed to send cancel"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_POOL_MAX_IDLE_PER_HOST;
    use crate::http::WORKER_PATH;
    use std::collections::BTreeMap;
    use tally_engine::result::{Number, NumberResult};
    use tally_engine::{AnalyzerResult, ComponentJob, ErrorKind, JobStatus};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job() -> AnalysisJob {
        AnalysisJob::new(["word"]).component(ComponentJob::new("row-count").key("rows"))
    }

    fn rows_payload(count: i64) -> Vec<u8> {
        let results = BTreeMap::from([(
            "rows".to_string(),
            AnalyzerResult::Number(NumberResult::new(count)),
        )]);
        WirePayload::result(results).encode().unwrap()
    }

    #[test]
    fn test_new_validates_endpoints() {
        let empty: [&str; 0] = [];
        assert!(matches!(HttpClusterManager::new(empty), Err(DispatchError::NoWorkers)));
        assert!(matches!(
            HttpClusterManager::new(["not a url"]),
            Err(DispatchError::InvalidEndpoint { .. })
        ));

        let manager = HttpClusterManager::new(["http://a:8090/tally/worker", "http://b:8090/tally/worker"]).unwrap();
        assert_eq!(manager.worker_count(), 2);
        assert_eq!(
            manager.endpoint_for(DivisionContext::new(3, 4)).as_deref(),
            Some("http://b:8090/tally/worker")
        );
    }

    #[test]
    fn test_from_config() {
        let config = DispatcherConfig {
            endpoints: vec!["http://a:8090/tally/worker".into()],
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            http_timeout_secs: Some(30),
        };
        let manager = HttpClusterManager::from_config(&config).unwrap();
        assert_eq!(manager.endpoints().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_decodes_worker_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(WORKER_PATH))
            .and(body_string_contains("action=run"))
            .and(body_string_contains("slave-job-id="))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(rows_payload(7)))
            .expect(1)
            .mount(&server)
            .await;

        let manager = HttpClusterManager::new([format!("{}{}", server.uri(), WORKER_PATH)]).unwrap();
        let outcome = manager
            .dispatch_job(&job(), DivisionContext::single())
            .unwrap()
            .outcome()
            .await;
        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert_eq!(
            outcome.result.get("rows"),
            Some(&AnalyzerResult::Number(NumberResult::new(Number::Integer(7))))
        );
    }

    #[tokio::test]
    async fn test_worker_errors_are_tagged_with_division() {
        let server = MockServer::start().await;
        let payload = WirePayload::errors(vec![JobError::new(ErrorKind::RowProcessing, "bad row")]);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.encode().unwrap()))
            .mount(&server)
            .await;

        let manager = HttpClusterManager::new([server.uri()]).unwrap();
        let outcome = manager
            .dispatch_job(&job(), DivisionContext::new(2, 3))
            .unwrap()
            .outcome()
            .await;
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.errors[0].kind, ErrorKind::RowProcessing);
        assert_eq!(outcome.errors[0].division, Some(2));
    }

    #[tokio::test]
    async fn test_non_ok_status_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let manager = HttpClusterManager::new([server.uri()]).unwrap();
        let outcome = manager
            .dispatch_job(&job(), DivisionContext::single())
            .unwrap()
            .outcome()
            .await;
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.errors[0].kind, ErrorKind::Transport);
        assert!(outcome.errors[0].message.contains("503"));
    }

    #[tokio::test]
    async fn test_unreadable_payload_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let manager = HttpClusterManager::new([server.uri()]).unwrap();
        let outcome = manager
            .dispatch_job(&job(), DivisionContext::single())
            .unwrap()
            .outcome()
            .await;
        assert_eq!(outcome.errors[0].kind, ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_cancel_notifies_worker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("action=run"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("action=cancel"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"cancelled":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        let manager = HttpClusterManager::new([server.uri()]).unwrap();
        let future = manager.dispatch_job(&job(), DivisionContext::single()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(future.cancel());
        assert_eq!(future.outcome().await.status, JobStatus::Cancelled);

        for _ in 0..50 {
            let cancels = server
                .received_requests()
                .await
                .unwrap_or_default()
                .iter()
                .filter(|r| String::from_utf8_lossy(&r.body).contains("action=cancel"))
                .count();
            if cancels == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("worker never received the cancel request");
    }
}
