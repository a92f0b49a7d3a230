//! An in-process loopback "relay".
//!
//! A [`MemoryNetwork`] stands in for the relay server: hosts register a
//! room under their allocation id, clients with the same allocation id
//! connect into it. Each participant gets its own [`MemoryTransport`]
//! driver from [`MemoryNetwork::driver`].
//!
//! ```text
//! host driver ──┐                 ┌── client driver (conn-1)
//!               ├── MemoryNetwork ┤
//!               │   room "alloc"  └── client driver (conn-2)
//! ```
//!
//! Drivers also expose knobs for tests: refuse the next start, hold the
//! `Connected` callback back, or simulate a drop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use lobbyforge_protocol::{ConnectionId, TransportConfig, TransportRole};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::{HOST_CONNECTION, TransportDriver, TransportError, TransportEvent};

type EventTx = UnboundedSender<TransportEvent>;

struct Room {
    host: EventTx,
    clients: HashMap<ConnectionId, EventTx>,
    next_id: u64,
}

/// The shared loopback medium.
#[derive(Default)]
pub struct MemoryNetwork {
    rooms: Mutex<HashMap<String, Room>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A fresh driver attached to this network.
    pub fn driver(self: &Arc<Self>) -> MemoryTransport {
        MemoryTransport {
            network: Arc::clone(self),
            attachment: Mutex::new(None),
            knobs: Mutex::new(Knobs::default()),
        }
    }

    /// Number of clients connected to the room for `allocation_id`.
    pub fn client_count(&self, allocation_id: &str) -> usize {
        self.rooms
            .lock()
            .get(allocation_id)
            .map_or(0, |room| room.clients.len())
    }

    pub fn has_room(&self, allocation_id: &str) -> bool {
        self.rooms.lock().contains_key(allocation_id)
    }
}

#[derive(Clone)]
struct Attachment {
    allocation_id: String,
    role: TransportRole,
    local: ConnectionId,
    events: EventTx,
}

#[derive(Default)]
struct Knobs {
    start_errors: VecDeque<TransportError>,
    hold_connect: bool,
    /// A `Connected` callback withheld by `hold_connect`.
    held: Option<(EventTx, ConnectionId)>,
}

/// A [`TransportDriver`] over a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    attachment: Mutex<Option<Attachment>>,
    knobs: Mutex<Knobs>,
}

impl MemoryTransport {
    /// The next `start_*` call fails with `error`.
    pub fn fail_next_start(&self, error: TransportError) {
        self.knobs.lock().start_errors.push_back(error);
    }

    /// While set, starts succeed but `Connected` is withheld until
    /// [`release_connect`](Self::release_connect).
    pub fn hold_connect(&self, hold: bool) {
        self.knobs.lock().hold_connect = hold;
    }

    /// Delivers a withheld `Connected` callback.
    pub fn release_connect(&self) {
        let held = self.knobs.lock().held.take();
        if let Some((events, local)) = held {
            let _ = events.send(TransportEvent::Connected { local });
        }
    }

    pub fn is_started(&self) -> bool {
        self.attachment.lock().is_some()
    }

    /// This driver's connection id while started.
    pub fn local_connection(&self) -> Option<ConnectionId> {
        self.attachment.lock().as_ref().map(|a| a.local)
    }

    /// Simulates the connection dropping underneath us.
    pub fn simulate_drop(&self, reason: &str) {
        if let Some(attachment) = self.detach() {
            let _ = attachment.events.send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// Simulates an unrecoverable transport error.
    pub fn simulate_failure(&self, reason: &str) {
        if let Some(attachment) = self.detach() {
            let _ = attachment.events.send(TransportEvent::Failed {
                reason: reason.to_string(),
            });
        }
    }

    fn take_start_error(&self) -> Result<(), TransportError> {
        if self.attachment.lock().is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        match self.knobs.lock().start_errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn announce_connected(&self, events: &EventTx, local: ConnectionId) {
        let mut knobs = self.knobs.lock();
        if knobs.hold_connect {
            knobs.held = Some((events.clone(), local));
        } else {
            let _ = events.send(TransportEvent::Connected { local });
        }
    }

    /// Leaves the network and tells whoever is on the other side.
    fn detach(&self) -> Option<Attachment> {
        let attachment = self.attachment.lock().take()?;
        self.knobs.lock().held = None;
        let mut rooms = self.network.rooms.lock();
        match attachment.role {
            TransportRole::Host => {
                if let Some(room) = rooms.remove(&attachment.allocation_id) {
                    for client in room.clients.values() {
                        let _ = client.send(TransportEvent::Disconnected {
                            reason: "host left".into(),
                        });
                    }
                }
            }
            TransportRole::Client => {
                if let Some(room) = rooms.get_mut(&attachment.allocation_id) {
                    if room.clients.remove(&attachment.local).is_some() {
                        let _ = room
                            .host
                            .send(TransportEvent::PeerDisconnected(attachment.local));
                    }
                }
            }
        }
        Some(attachment)
    }
}

#[async_trait]
impl TransportDriver for MemoryTransport {
    async fn start_host(
        &self,
        config: TransportConfig,
        events: EventTx,
    ) -> Result<(), TransportError> {
        self.take_start_error()?;
        {
            let mut rooms = self.network.rooms.lock();
            if rooms.contains_key(&config.allocation_id) {
                return Err(TransportError::StartFailed(format!(
                    "allocation {} already hosted",
                    config.allocation_id
                )));
            }
            rooms.insert(
                config.allocation_id.clone(),
                Room {
                    host: events.clone(),
                    clients: HashMap::new(),
                    next_id: 1,
                },
            );
        }
        *self.attachment.lock() = Some(Attachment {
            allocation_id: config.allocation_id.clone(),
            role: TransportRole::Host,
            local: HOST_CONNECTION,
            events: events.clone(),
        });
        tracing::debug!(allocation_id = %config.allocation_id, "memory transport hosting");
        self.announce_connected(&events, HOST_CONNECTION);
        Ok(())
    }

    async fn start_client(
        &self,
        config: TransportConfig,
        events: EventTx,
    ) -> Result<(), TransportError> {
        self.take_start_error()?;
        let local = {
            let mut rooms = self.network.rooms.lock();
            let room = rooms.get_mut(&config.allocation_id).ok_or_else(|| {
                TransportError::StartFailed(format!(
                    "no host on allocation {}",
                    config.allocation_id
                ))
            })?;
            let local = ConnectionId::new(room.next_id);
            room.next_id += 1;
            room.clients.insert(local, events.clone());
            let _ = room.host.send(TransportEvent::PeerConnected(local));
            local
        };
        *self.attachment.lock() = Some(Attachment {
            allocation_id: config.allocation_id.clone(),
            role: TransportRole::Client,
            local,
            events: events.clone(),
        });
        tracing::debug!(allocation_id = %config.allocation_id, %local, "memory transport connected");
        self.announce_connected(&events, local);
        Ok(())
    }

    async fn send(
        &self,
        to: ConnectionId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let attachment = self
            .attachment
            .lock()
            .clone()
            .ok_or(TransportError::NotStarted)?;
        let rooms = self.network.rooms.lock();
        let room = rooms.get(&attachment.allocation_id).ok_or_else(|| {
            TransportError::ConnectionClosed("room is gone".into())
        })?;
        let target = match attachment.role {
            TransportRole::Host => room.clients.get(&to),
            TransportRole::Client if to == HOST_CONNECTION => Some(&room.host),
            TransportRole::Client => None,
        }
        .ok_or(TransportError::UnknownConnection(to))?;
        target
            .send(TransportEvent::Message {
                from: attachment.local,
                payload,
            })
            .map_err(|_| TransportError::SendFailed(format!("{to} is gone")))
    }

    async fn disconnect_peer(
        &self,
        connection: ConnectionId,
    ) -> Result<(), TransportError> {
        let attachment = self
            .attachment
            .lock()
            .clone()
            .ok_or(TransportError::NotStarted)?;
        if attachment.role != TransportRole::Host {
            return Err(TransportError::UnknownConnection(connection));
        }
        let mut rooms = self.network.rooms.lock();
        let room = rooms
            .get_mut(&attachment.allocation_id)
            .ok_or(TransportError::NotStarted)?;
        let client = room
            .clients
            .remove(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        let _ = client.send(TransportEvent::Disconnected {
            reason: "disconnected by host".into(),
        });
        let _ = room.host.send(TransportEvent::PeerDisconnected(connection));
        Ok(())
    }

    async fn shutdown(&self) {
        if let Some(attachment) = self.detach() {
            tracing::debug!(allocation_id = %attachment.allocation_id, "memory transport shut down");
            let _ = attachment.events.send(TransportEvent::Disconnected {
                reason: "local shutdown".into(),
            });
        }
    }
}
