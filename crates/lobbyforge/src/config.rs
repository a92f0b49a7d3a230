//! Orchestrator configuration.

use std::time::Duration;

use lobbyforge_protocol::EventBus;
use lobbyforge_runtime::RuntimeConfig;
use lobbyforge_session::SessionMachineConfig;
use lobbyforge_transport::TransportMachineConfig;
use serde::{Deserialize, Serialize};

use crate::LobbyError;

/// Everything an [`Orchestrator`](crate::Orchestrator) can be tuned with.
///
/// Every field has a working default, so a JSON override only needs the
/// values it changes:
///
/// ```rust
/// use std::time::Duration;
/// use lobbyforge::LobbyConfig;
///
/// let config = LobbyConfig::from_json_str(
///     r#"{ "runtime": { "poll_interval": { "secs": 2, "nanos": 0 } } }"#,
/// )
/// .unwrap();
/// assert_eq!(config.runtime.poll_interval, Duration::from_secs(2));
/// assert_eq!(config.runtime.heartbeat_interval, Duration::from_secs(15));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    pub session: SessionMachineConfig,
    pub transport: TransportMachineConfig,
    pub runtime: RuntimeConfig,
    /// How often both state machines are checked for timeouts.
    pub timeout_check_interval: Duration,
    /// Events buffered per subscriber before the slowest one lags.
    pub event_capacity: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            session: SessionMachineConfig::default(),
            transport: TransportMachineConfig::default(),
            runtime: RuntimeConfig::default(),
            timeout_check_interval: Duration::from_secs(1),
            event_capacity: EventBus::DEFAULT_CAPACITY,
        }
    }
}

impl LobbyConfig {
    /// Returns a copy with every field in a usable range.
    pub fn validated(mut self) -> Self {
        self.session = self.session.validated();
        self.transport = self.transport.validated();
        self.runtime = self.runtime.validated();
        self.timeout_check_interval =
            self.timeout_check_interval.max(Duration::from_millis(10));
        self.event_capacity = self.event_capacity.max(16);
        self
    }

    /// Parses overrides from JSON and validates the result.
    pub fn from_json_str(json: &str) -> Result<Self, LobbyError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LobbyError::Config(e.to_string()))?;
        Ok(config.validated())
    }
}
