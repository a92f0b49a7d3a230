//! Transport abstraction layer for Lobbyforge.
//!
//! Lobbyforge doesn't move gameplay bytes itself. It starts a transport
//! through a [`TransportDriver`], listens to the driver's
//! [`TransportEvent`]s, and tracks where the connection is in its
//! lifecycle with a [`TransportStateMachine`].
//!
//! - [`TransportDriver`]: start as host or client against a relay
//!   allocation, send bytes to a connection, drop a peer, shut down.
//! - [`TransportStateMachine`]: validated transitions over
//!   [`TransportState`](lobbyforge_protocol::TransportState) with
//!   time-in-state timeouts.
//! - [`MemoryNetwork`] / [`MemoryTransport`]: an in-process loopback
//!   relay so hosts and clients can connect inside one test.

mod driver;
mod error;
mod machine;
mod memory;

pub use driver::{HOST_CONNECTION, TransportDriver, TransportEvent};
pub use error::TransportError;
pub use lobbyforge_protocol::ConnectionId;
pub use machine::{TransportMachineConfig, TransportStateMachine};
pub use memory::{MemoryNetwork, MemoryTransport};
