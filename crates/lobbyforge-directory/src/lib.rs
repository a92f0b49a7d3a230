//! Session-directory access for Lobbyforge.
//!
//! The directory is the remote service that knows which sessions exist
//! and who is in them. This crate provides:
//!
//! 1. **The seam**: [`DirectoryService`], one async method per remote
//!    endpoint. Implement it against your backend.
//! 2. **The client**: [`DirectoryClient`], a thin wrapper that
//!    validates input, tags the caller's identity onto each request and
//!    remembers the current session id. No retries, no state machine.
//! 3. **An in-process service**: [`MemoryDirectory`], a complete
//!    directory held in memory, for offline play and tests. It supports
//!    fault injection.
//!
//! # How it fits in the stack
//!
//! ```text
//! Orchestrator / Runtime (above)  ← interpret errors, retry, transition
//!     ↕
//! Directory layer (this crate)    ← one remote round-trip per call
//!     ↕
//! Protocol layer (below)          ← Session, Participant, patches
//! ```

mod client;
mod error;
mod memory;
mod service;

pub use client::{
    DirectoryClient, validate_join_code, validate_max_participants,
    validate_password, validate_session_name,
};
pub use error::DirectoryError;
pub use memory::{DirectoryOp, MemoryDirectory, MemoryDirectoryConfig};
pub use service::{CreateSessionRequest, DirectoryService, JoinSessionRequest};
