//! # Lobbyforge
//!
//! Multiplayer session coordination for small peer-hosted games.
//!
//! Lobbyforge gets a handful of players into the same room and keeps
//! them there: one player hosts a session in a remote directory, the
//! others join it by code, a relay gives everyone a path to the host,
//! and the lobby stays in sync while people come, go, get ready or drop.
//!
//! Everything is driven through one [`Orchestrator`]. The remote pieces
//! (directory, relay, transport) are injected as trait objects, so the
//! same orchestrator runs against real services or the in-memory ones
//! shipped with each layer crate.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use lobbyforge::prelude::*;
//!
//! # async fn run() -> Result<(), LobbyError> {
//! let network = MemoryNetwork::new();
//! let lobby = Orchestrator::builder()
//!     .local_participant(ParticipantId::new("host"))
//!     .directory(Arc::new(MemoryDirectory::default()))
//!     .relay(Arc::new(MemoryRelay::new()))
//!     .transport(Arc::new(network.driver()))
//!     .build()?;
//!
//! let mut events = lobby.subscribe();
//! let session = lobby.create_session("Room", 4, BTreeMap::new()).await?;
//! println!("share this code: {}", session.join_code);
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
mod flows;
pub mod logging;
mod orchestrator;
mod tasks;

pub use config::LobbyConfig;
pub use error::LobbyError;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};

/// Everything an application usually needs, in one import.
pub mod prelude {
    pub use crate::{LobbyConfig, LobbyError, Orchestrator, OrchestratorBuilder};
    pub use lobbyforge_directory::{
        DirectoryClient, DirectoryError, DirectoryService, MemoryDirectory,
        MemoryDirectoryConfig,
    };
    pub use lobbyforge_protocol::{
        ConnectionId, ErrorKind, EventSubscription, LobbyEvent, NetworkStatus,
        Participant, ParticipantId, Session, SessionId, SessionPatch,
        SessionPhase, SessionState, TransportState, metadata, participant_data,
    };
    pub use lobbyforge_relay::{MemoryRelay, RelayError, RelayService};
    pub use lobbyforge_runtime::RuntimeConfig;
    pub use lobbyforge_session::{SessionFailure, SessionMachineConfig};
    pub use lobbyforge_transport::{
        MemoryNetwork, MemoryTransport, TransportDriver, TransportError,
        TransportMachineConfig,
    };
}
