//! Local session bookkeeping for Lobbyforge.
//!
//! This crate holds the two pieces of state the orchestrator owns:
//!
//! 1. **Lobby flow state** ([`SessionStateMachine`]). Where the user is
//!    in create/join/leave, with validated transitions, async entry and
//!    exit hooks ([`SessionHooks`]) and time-in-state timeouts.
//! 2. **Identity reconciliation** ([`IdentityRegistry`]). Which
//!    transport connection belongs to which directory participant.
//!
//! # How it fits in the stack
//!
//! ```text
//! Orchestrator (above)     ← drives transitions, feeds the registry
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Protocol layer (below)   ← SessionState, ids, LobbyEvent
//! ```

mod error;
mod machine;
mod registry;

pub use error::SessionError;
pub use machine::{
    NoHooks, SessionFailure, SessionHooks, SessionMachineConfig,
    SessionStateMachine,
};
pub use registry::{IdentityMapping, IdentityRegistry};
