use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the synchronization runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Bound of the shared fan-out queue.
    pub queue_capacity: usize,
    /// Bound of each subscriber's delivery channel.
    pub subscriber_buffer: usize,
    /// Admission limit for concurrently executing runs.
    pub max_concurrent_runs: usize,
    pub shutdown_grace_ms: u64,
    /// Length of generated step summaries before truncation.
    pub summary_preview_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            subscriber_buffer: 64,
            max_concurrent_runs: 64,
            shutdown_grace_ms: 5_000,
            summary_preview_len: 200,
        }
    }
}

impl SyncConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
