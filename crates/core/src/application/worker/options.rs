// Worker pool tuning

use super::constants::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing knobs of a worker pool. All values are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerOptions {
    pub idle_poll_interval_ms: u64,
    pub busy_poll_interval_ms: u64,
    pub drain_poll_interval_ms: u64,
    pub error_backoff_ms: u64,
    /// Per-execution limit; expiry counts as a retryable failure
    pub execution_timeout_ms: Option<u64>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            idle_poll_interval_ms: DEFAULT_IDLE_POLL_MS,
            busy_poll_interval_ms: DEFAULT_BUSY_POLL_MS,
            drain_poll_interval_ms: DEFAULT_DRAIN_POLL_MS,
            error_backoff_ms: DEFAULT_ERROR_BACKOFF_MS,
            execution_timeout_ms: None,
        }
    }
}

impl WorkerOptions {
    pub fn with_execution_timeout(mut self, millis: u64) -> Self {
        self.execution_timeout_ms = Some(millis);
        self
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn busy_poll_interval(&self) -> Duration {
        Duration::from_millis(self.busy_poll_interval_ms)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_ms.map(Duration::from_millis)
    }
}
