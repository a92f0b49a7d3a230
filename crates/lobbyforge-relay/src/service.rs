//! The remote relay seam.

use async_trait::async_trait;
use lobbyforge_protocol::RelayEndpoint;

use crate::RelayError;

/// A relay room reserved by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub allocation_id: String,
    pub endpoint: RelayEndpoint,
    pub connection_data: Vec<u8>,
    pub key: Vec<u8>,
    pub max_connections: u32,
}

/// What a client receives when it joins an allocation by code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedAllocation {
    pub allocation_id: String,
    pub endpoint: RelayEndpoint,
    pub connection_data: Vec<u8>,
    /// The host's connection blob, needed to reach the host peer.
    pub host_connection_data: Vec<u8>,
    pub key: Vec<u8>,
}

/// One method per remote relay endpoint. No retries; expected failures
/// are [`RelayError`] values.
#[async_trait]
pub trait RelayService: Send + Sync + 'static {
    /// Reserves a relay room for up to `max_connections` peers (the
    /// host not included).
    async fn create_allocation(
        &self,
        max_connections: u32,
    ) -> Result<Allocation, RelayError>;

    /// Derives the short code clients use to find `allocation_id`.
    /// Asking twice for the same allocation returns the same code.
    async fn get_join_code(
        &self,
        allocation_id: &str,
    ) -> Result<String, RelayError>;

    async fn join_allocation(
        &self,
        join_code: &str,
    ) -> Result<JoinedAllocation, RelayError>;
}
