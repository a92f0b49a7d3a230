//! The per-session heartbeat and poll loop.
//!
//! Once a session is live, one [`SessionRuntime`] task keeps it that
//! way:
//!
//! - the host pings the directory every `heartbeat_interval`
//! - everyone polls for a fresh snapshot every `poll_interval`, backing
//!   off on transient errors
//! - each new snapshot is diffed against the last one
//!   ([`diff_participants`]) and the differences are published
//!
//! The loop ends when it is cancelled, when the directory says the
//! session is gone, when the local participant disappears from it, or
//! when heartbeats keep failing. See [`RuntimeExit`].

mod config;
mod diff;
mod runtime;

pub use config::RuntimeConfig;
pub use diff::diff_participants;
pub use runtime::{RuntimeExit, RuntimeHandle, SessionRuntime};
