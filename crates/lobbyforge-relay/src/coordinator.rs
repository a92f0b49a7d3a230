//! The relay coordinator: allocation in, transport configuration out.

use std::sync::Arc;

use lobbyforge_protocol::{TransportConfig, TransportRole};
use parking_lot::Mutex;

use crate::{Allocation, RelayError, RelayService};

const MIN_CODE_LEN: usize = 6;
const MAX_CODE_LEN: usize = 12;
const MAX_CONNECTIONS: u32 = 100;

/// The allocation backing the session this process hosts.
#[derive(Debug, Clone)]
struct HostedRelay {
    allocation: Allocation,
    join_code: String,
}

/// Produces transport configurations from relay allocations.
///
/// Holds at most one host allocation. Calling
/// [`setup_host_relay`](Self::setup_host_relay) again while one is
/// cached returns the cached allocation instead of leaking a second one,
/// as long as it is large enough. [`release`](Self::release) forgets it.
///
/// Not single-flight on its own: two concurrent host setups can both
/// allocate. The orchestrator's operation guard prevents that.
pub struct RelayCoordinator {
    service: Arc<dyn RelayService>,
    hosted: Mutex<Option<HostedRelay>>,
}

impl RelayCoordinator {
    pub fn new(service: Arc<dyn RelayService>) -> Self {
        Self {
            service,
            hosted: Mutex::new(None),
        }
    }

    /// Allocates (or reuses) a relay room for `max_connections` peers and
    /// returns the host transport config plus the code to publish.
    pub async fn setup_host_relay(
        &self,
        max_connections: u32,
    ) -> Result<(TransportConfig, String), RelayError> {
        validate_max_connections(max_connections)?;

        let cached = self.hosted.lock().clone();
        if let Some(hosted) = cached {
            if hosted.allocation.max_connections >= max_connections {
                tracing::debug!(
                    allocation_id = %hosted.allocation.allocation_id,
                    "reusing host relay allocation"
                );
                return Ok((host_config(&hosted.allocation), hosted.join_code));
            }
            tracing::info!(
                allocation_id = %hosted.allocation.allocation_id,
                had = hosted.allocation.max_connections,
                wanted = max_connections,
                "cached relay allocation too small, allocating a new one"
            );
        }

        let allocation = self
            .service
            .create_allocation(max_connections)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "relay allocation failed"))?;
        let join_code = self
            .service
            .get_join_code(&allocation.allocation_id)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "relay join code failed"))?;

        tracing::info!(
            allocation_id = %allocation.allocation_id,
            %join_code,
            max_connections,
            "host relay ready"
        );

        let config = host_config(&allocation);
        *self.hosted.lock() = Some(HostedRelay {
            allocation,
            join_code: join_code.clone(),
        });
        Ok((config, join_code))
    }

    /// Resolves a join code into a client transport config.
    pub async fn join_as_client(
        &self,
        join_code: &str,
    ) -> Result<TransportConfig, RelayError> {
        validate_relay_join_code(join_code)?;
        let code = join_code.trim().to_ascii_uppercase();

        let joined = self
            .service
            .join_allocation(&code)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, %code, "relay join failed"))?;

        tracing::info!(allocation_id = %joined.allocation_id, %code, "joined relay");
        Ok(TransportConfig {
            role: TransportRole::Client,
            allocation_id: joined.allocation_id,
            endpoint: joined.endpoint,
            connection_data: joined.connection_data,
            host_connection_data: Some(joined.host_connection_data),
            key: joined.key,
            max_connections: 1,
        })
    }

    /// The join code of the cached host allocation, if any.
    pub fn hosted_join_code(&self) -> Option<String> {
        self.hosted.lock().as_ref().map(|h| h.join_code.clone())
    }

    /// Forgets the cached host allocation. Idempotent.
    pub fn release(&self) {
        if let Some(hosted) = self.hosted.lock().take() {
            tracing::debug!(
                allocation_id = %hosted.allocation.allocation_id,
                "host relay released"
            );
        }
    }
}

fn host_config(allocation: &Allocation) -> TransportConfig {
    TransportConfig {
        role: TransportRole::Host,
        allocation_id: allocation.allocation_id.clone(),
        endpoint: allocation.endpoint.clone(),
        connection_data: allocation.connection_data.clone(),
        host_connection_data: None,
        key: allocation.key.clone(),
        max_connections: allocation.max_connections,
    }
}

/// Relay join codes are 6–12 ASCII alphanumerics.
pub fn validate_relay_join_code(code: &str) -> Result<(), RelayError> {
    let code = code.trim();
    if !(MIN_CODE_LEN..=MAX_CODE_LEN).contains(&code.len())
        || !code.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(RelayError::Validation(format!(
            "relay join code must be {MIN_CODE_LEN}-{MAX_CODE_LEN} alphanumeric characters"
        )));
    }
    Ok(())
}

pub fn validate_max_connections(max: u32) -> Result<(), RelayError> {
    if !(1..=MAX_CONNECTIONS).contains(&max) {
        return Err(RelayError::Validation(format!(
            "max connections must be 1-{MAX_CONNECTIONS}, got {max}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_relay_join_code_length_and_charset() {
        assert!(validate_relay_join_code("ABC123").is_ok());
        assert!(validate_relay_join_code("abc123def456").is_ok());
        assert!(validate_relay_join_code("ABC12").is_err());
        assert!(validate_relay_join_code("ABC1234567890").is_err());
        assert!(validate_relay_join_code("ABC-12").is_err());
    }

    #[test]
    fn test_validate_max_connections_bounds() {
        assert!(validate_max_connections(0).is_err());
        assert!(validate_max_connections(1).is_ok());
        assert!(validate_max_connections(100).is_ok());
        assert!(validate_max_connections(101).is_err());
    }
}
