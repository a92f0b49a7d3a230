//! Relay allocation for Lobbyforge.
//!
//! Participants usually sit behind NAT, so the transport goes through a
//! relay. The host allocates a relay room and publishes a short join
//! code; clients resolve that code back into the same allocation.
//!
//! - [`RelayService`] is the remote seam (allocate, get code, join).
//! - [`RelayCoordinator`] turns service results into a
//!   [`TransportConfig`](lobbyforge_protocol::TransportConfig) and keeps
//!   at most one host allocation alive.
//! - [`MemoryRelay`] is an in-process service with fault injection.

mod coordinator;
mod error;
mod memory;
mod service;

pub use coordinator::{
    RelayCoordinator, validate_max_connections, validate_relay_join_code,
};
pub use error::RelayError;
pub use memory::{MemoryRelay, RelayOp};
pub use service::{Allocation, JoinedAllocation, RelayService};
