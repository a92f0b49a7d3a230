//! Shared vocabulary for Lobbyforge.
//!
//! This crate defines everything the other layers agree on:
//!
//! - **Data model** ([`Session`], [`Participant`], [`SessionId`],
//!   [`ParticipantId`], [`ConnectionId`]): the snapshot shapes returned
//!   by the session directory and the two identity spaces.
//! - **State enums** ([`SessionState`], [`TransportState`]) and their
//!   transition tables.
//! - **Events** ([`LobbyEvent`], [`EventBus`]): the single typed
//!   dispatcher every component publishes into.
//! - **Handshake** ([`HandshakeMessage`], [`Codec`], [`JsonCodec`]): the
//!   identity exchange carried over the transport once it connects.
//! - **Errors** ([`ProtocolError`], [`ErrorKind`]).
//!
//! # Architecture
//!
//! ```text
//! Directory / Relay / Transport (remote)  →  Protocol (snapshots, events)  →  Orchestrator
//! ```

mod codec;
mod error;
mod events;
mod state;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::{ErrorKind, ProtocolError};
pub use events::{EventBus, EventSubscription, LobbyEvent};
pub use state::{SessionState, TransportState};
pub use types::{
    ConnectionId, HandshakeMessage, NetworkStatus, Participant,
    ParticipantPatch, ParticipantId, RelayEndpoint, Session, SessionId,
    SessionPatch, SessionPhase, TransportConfig, TransportRole,
    metadata, participant_data,
};
