//! The transport seam.

use async_trait::async_trait;
use lobbyforge_protocol::{ConnectionId, TransportConfig};
use tokio::sync::mpsc;

use crate::TransportError;

/// The connection id a client uses to address the host.
pub const HOST_CONNECTION: ConnectionId = ConnectionId::new(0);

/// Callbacks from a running transport, delivered in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The local side is connected. `local` is this process's own
    /// connection id ([`HOST_CONNECTION`] for the host).
    Connected { local: ConnectionId },
    /// Host only: a remote client connected.
    PeerConnected(ConnectionId),
    /// Host only: a remote client went away.
    PeerDisconnected(ConnectionId),
    Message {
        from: ConnectionId,
        payload: Vec<u8>,
    },
    /// The local connection closed, expectedly or not.
    Disconnected { reason: String },
    /// The transport broke and cannot continue.
    Failed { reason: String },
}

/// Drives an actual network transport.
///
/// `start_host`/`start_client` return once the driver has begun
/// connecting; the outcome arrives later as a [`TransportEvent`] on
/// `events`. Exactly one of `Connected`, `Disconnected` or `Failed`
/// follows a successful start.
#[async_trait]
pub trait TransportDriver: Send + Sync + 'static {
    async fn start_host(
        &self,
        config: TransportConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError>;

    async fn start_client(
        &self,
        config: TransportConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError>;

    async fn send(
        &self,
        to: ConnectionId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Host only: drops one client.
    async fn disconnect_peer(
        &self,
        connection: ConnectionId,
    ) -> Result<(), TransportError>;

    /// Stops the transport. Idempotent; a stopped driver may be started
    /// again.
    async fn shutdown(&self);
}
