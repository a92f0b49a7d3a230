//! Lobby events and the dispatcher that carries them.
//!
//! Every component that raises events holds a clone of the same
//! [`EventBus`]. Subscribers get an [`EventSubscription`]; dropping it
//! (or calling [`EventSubscription::unsubscribe`]) ends the
//! subscription, so handler lifetimes follow ordinary ownership and
//! nothing leaks when a UI screen goes away.

use tokio::sync::broadcast;

use crate::{
    ConnectionId, ErrorKind, Participant, ParticipantId, Session, SessionId,
    SessionState, TransportState,
};

/// Everything the core reports to the surrounding application.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    // -- Session lifecycle --
    /// The local player created (and hosts) this session.
    SessionCreated(Session),
    /// The local player joined this session.
    SessionJoined(Session),
    /// A fresh snapshot arrived (poll or local update).
    SessionUpdated(Session),
    /// The local player left the session.
    SessionLeft { session_id: SessionId },
    /// The session no longer exists (deleted by host or expired).
    SessionRemoved { session_id: SessionId },
    /// A directory call referenced a session that does not exist.
    SessionNotFound { session_id: Option<SessionId> },
    /// The host's heartbeats failed too many times in a row.
    SessionLost { session_id: SessionId },
    /// The local participant is no longer listed in the session.
    Kicked { session_id: SessionId },

    // -- Membership --
    ParticipantJoined {
        session_id: SessionId,
        participant: Participant,
    },
    ParticipantLeft {
        session_id: SessionId,
        participant: Participant,
    },
    ParticipantUpdated {
        session_id: SessionId,
        previous: Participant,
        current: Participant,
    },
    /// Host migration.
    HostChanged {
        session_id: SessionId,
        previous: ParticipantId,
        current: ParticipantId,
    },

    // -- Transport --
    TransportConnected { connection: ConnectionId },
    TransportDisconnected { reason: String },
    TransportFailed { reason: String },
    PeerConnected { connection: ConnectionId },
    PeerDisconnected { connection: ConnectionId },
    /// Debug/UI only: a directory ↔ transport mapping changed.
    IdentityMappingChanged {
        participant: ParticipantId,
        connection: Option<ConnectionId>,
        confirmed: bool,
    },

    // -- State machines --
    SessionStateChanged {
        from: SessionState,
        to: SessionState,
    },
    TransportStateChanged {
        from: TransportState,
        to: TransportState,
    },

    /// A user-visible failure: one summarised sentence plus its kind.
    OperationFailed { kind: ErrorKind, message: String },
}

/// Typed fan-out dispatcher for [`LobbyEvent`]s.
///
/// Cheap to clone; all clones publish into the same channel. Emitting
/// with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LobbyEvent>,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Creates a bus that buffers up to `capacity` events per
    /// subscriber before the slowest one starts losing events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to every live subscription.
    pub fn emit(&self, event: LobbyEvent) {
        tracing::trace!(?event, "lobby event");
        let _ = self.tx.send(event);
    }

    /// Starts a new subscription. Only events emitted after this call
    /// are delivered.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// A live subscription to an [`EventBus`].
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<LobbyEvent>,
}

impl EventSubscription {
    /// Waits for the next event. Returns `None` once every bus clone
    /// has been dropped. Lagging subscribers skip what they missed.
    pub async fn recv(&mut self) -> Option<LobbyEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<LobbyEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drains every buffered event.
    pub fn drain(&mut self) -> Vec<LobbyEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Ends the subscription. Equivalent to dropping it.
    pub fn unsubscribe(self) {}
}
