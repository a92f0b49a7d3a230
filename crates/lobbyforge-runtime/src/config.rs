use std::time::Duration;

use serde::{Deserialize, Serialize};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Cadences and limits for the session runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Host liveness ping interval.
    pub heartbeat_interval: Duration,
    /// Baseline snapshot poll interval. 2–4s suits a real directory;
    /// `validated` only applies the 10ms floor.
    pub poll_interval: Duration,
    /// Ceiling for the poll backoff after repeated errors.
    pub poll_backoff_max: Duration,
    /// Consecutive heartbeat failures before the session counts as lost.
    pub max_heartbeat_failures: u32,
    /// Random extra delay before the first poll, so participants that
    /// joined together don't poll in lockstep.
    pub start_jitter: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            poll_interval: Duration::from_secs(3),
            poll_backoff_max: Duration::from_secs(30),
            max_heartbeat_failures: 3,
            start_jitter: Duration::from_millis(500),
        }
    }
}

impl RuntimeConfig {
    /// Returns a copy with every field in a usable range.
    pub fn validated(mut self) -> Self {
        self.heartbeat_interval = self.heartbeat_interval.max(MIN_INTERVAL);
        self.poll_interval = self.poll_interval.max(MIN_INTERVAL);
        self.poll_backoff_max = self.poll_backoff_max.max(self.poll_interval);
        self.max_heartbeat_failures = self.max_heartbeat_failures.max(1);
        self
    }
}
