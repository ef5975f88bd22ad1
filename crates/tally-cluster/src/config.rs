//! Configuration management

use std::path::PathBuf;

// ============================================================================
// Worker Configuration Constants
// ============================================================================

/// Default worker host binding.
pub const DEFAULT_WORKER_HOST: &str = "127.0.0.1";

/// Default worker port.
pub const DEFAULT_WORKER_PORT: u16 = 8090;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Dispatcher Configuration Constants
// ============================================================================

/// Default number of idle connections kept per worker.
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;

/// Cluster configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub worker: WorkerConfig,
    pub dispatcher: DispatcherConfig,
}

/// Settings of a `tally-worker` process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    /// CSV file divisions read their rows from
    pub data: Option<PathBuf>,
}

/// Settings of the coordinator side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Worker endpoint URLs, e.g. `http://10.0.0.5:8090/tally/worker`
    pub endpoints: Vec<String>,
    pub pool_max_idle_per_host: usize,
    /// HTTP client timeout; none by default
    pub http_timeout_secs: Option<u64>,
}

impl ClusterConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = ClusterConfig {
            worker: WorkerConfig {
                host: std::env::var("TALLY_WORKER_HOST")
                    .unwrap_or_else(|_| DEFAULT_WORKER_HOST.to_string()),
                port: std::env::var("TALLY_WORKER_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_WORKER_PORT),
                shutdown_timeout_secs: std::env::var("TALLY_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
                data: std::env::var("TALLY_WORKER_DATA").ok().map(PathBuf::from),
            },
            dispatcher: DispatcherConfig {
                endpoints: std::env::var("TALLY_WORKER_ENDPOINTS")
                    .map(|s| parse_endpoints(&s))
                    .unwrap_or_default(),
                pool_max_idle_per_host: std::env::var("TALLY_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_POOL_MAX_IDLE_PER_HOST),
                http_timeout_secs: std::env::var("TALLY_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok()),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker.port == 0 {
            anyhow::bail!("Worker port must be greater than 0");
        }

        if self.dispatcher.pool_max_idle_per_host == 0 {
            anyhow::bail!("pool_max_idle_per_host must be greater than 0");
        }

        for endpoint in &self.dispatcher.endpoints {
            if let Err(e) = url::Url::parse(endpoint) {
                anyhow::bail!("Invalid worker endpoint '{}': {}", endpoint, e);
            }
        }

        if self.dispatcher.http_timeout_secs == Some(0) {
            tracing::warn!("TALLY_HTTP_TIMEOUT_SECS is 0 - requests will time out immediately");
        }

        Ok(())
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig {
                host: DEFAULT_WORKER_HOST.to_string(),
                port: DEFAULT_WORKER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                data: None,
            },
            dispatcher: DispatcherConfig {
                endpoints: Vec::new(),
                pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
                http_timeout_secs: None,
            },
        }
    }
}

/// Split a comma-separated endpoint list, dropping blanks
pub fn parse_endpoints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ClusterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_parse_endpoints() {
        assert_eq!(
            parse_endpoints(" http://a:8090/tally/worker, ,http://b:8090/tally/worker "),
            vec!["http://a:8090/tally/worker", "http://b:8090/tally/worker"]
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClusterConfig::default();
        config.worker.port = 0;
        assert!(config.validate().is_err());

        let mut config = ClusterConfig::default();
        config.dispatcher.endpoints = vec!["not a url".into()];
        assert!(config.validate().is_err());

        let mut config = ClusterConfig::default();
        config.dispatcher.pool_max_idle_per_host = 0;
        assert!(config.validate().is_err());
    }
}
