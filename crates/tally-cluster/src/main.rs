//! Tally worker - runs divisions sent by a coordinator

use anyhow::{Context, Result};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tally_cluster::{config::ClusterConfig, http::WorkerService};
use tally_common::logging::{init_logging, LogConfig};
use tally_engine::runner::AnalysisEnvironment;
use tally_engine::source::{CsvRowSource, RowSource};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("tally-worker")
        .filter_directives("tally_cluster=debug,tally_engine=info,tower_http=debug")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    info!("Starting Tally worker");

    let config = ClusterConfig::load()?;
    let data = config
        .worker
        .data
        .clone()
        .context("TALLY_WORKER_DATA must point to the CSV file divisions read from")?;
    let source = CsvRowSource::new(data);
    let columns = source.columns()?;
    info!(path = %source.path().display(), columns = columns.len(), "Row source ready");

    let service = WorkerService::new(AnalysisEnvironment::with_builtin(), Arc::new(source));
    let app = service.router();

    let addr: SocketAddr = format!("{}:{}", config.worker.host, config.worker.port).parse()?;
    info!("Worker listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.worker.shutdown_timeout_secs))
        .await?;

    info!("Worker shut down gracefully");

    Ok(())
}

async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {} seconds for running divisions", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
