/// Configuration for the repository pipeline
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on concurrently admitted operations
const MAX_SUPPORTED_CONCURRENCY: usize = 65_536;

/// Configuration for a [`Repository`](crate::services::Repository) and its decorator chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Maximum operations admitted at once by the scheduler
    pub max_concurrent_requests: usize,

    /// How long a queued caller waits for admission (`None` waits forever)
    pub admission_timeout_ms: Option<u64>,

    /// Snapshot interval for live queries over providers without a change feed
    pub live_poll_interval_ms: u64,

    /// Capacity of the memory store's change feed
    pub change_feed_capacity: usize,

    /// Channel capacity between scheduler pump tasks and consumers
    pub stream_buffer: usize,

    pub scheduling: bool,
    pub live_queries: bool,
    pub mandatory_properties: bool,
    pub update_references_first: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 100,
            admission_timeout_ms: Some(30_000),
            live_poll_interval_ms: 1000,
            change_feed_capacity: 1024,
            stream_buffer: 64,
            scheduling: true,
            live_queries: true,
            mandatory_properties: true,
            update_references_first: true,
        }
    }
}

impl RepositoryConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config
            .validate()
            .map_err(crate::RepositoryError::configuration)?;
        Ok(config)
    }

    pub fn admission_timeout(&self) -> Option<Duration> {
        self.admission_timeout_ms.map(Duration::from_millis)
    }

    pub fn live_poll_interval(&self) -> Duration {
        Duration::from_millis(self.live_poll_interval_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_requests == 0 {
            return Err("max_concurrent_requests must be greater than 0".to_string());
        }

        if self.max_concurrent_requests > MAX_SUPPORTED_CONCURRENCY {
            return Err(format!(
                "max_concurrent_requests cannot exceed {}",
                MAX_SUPPORTED_CONCURRENCY
            ));
        }

        if self.admission_timeout_ms == Some(0) {
            return Err("admission_timeout_ms must be greater than 0 when set".to_string());
        }

        if self.live_poll_interval_ms == 0 {
            return Err("live_poll_interval_ms must be greater than 0".to_string());
        }

        if self.change_feed_capacity == 0 {
            return Err("change_feed_capacity must be greater than 0".to_string());
        }

        if self.stream_buffer == 0 {
            return Err("stream_buffer must be greater than 0".to_string());
        }

        Ok(())
    }
}
