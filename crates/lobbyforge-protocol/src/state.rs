//! The two lifecycle enums and their transition tables.
//!
//! The machines that enforce these tables live in `lobbyforge-session`
//! and `lobbyforge-transport`; the enums live here because events and
//! the orchestrator need to name them without depending on either.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The user-facing lobby flow.
///
/// ```text
///            ┌──→ Creating ──┐
///   Idle ────┤               ├──→ Active ──┬──→ Leaving ──┐
///     ↑      └──→ Joining ───┘             └──→ Removing ─┼──→ Idle
///     │                │                                  │
///     └──── Failed ←───┴──────────── (any failure) ───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Creating,
    Joining,
    Active,
    Leaving,
    Removing,
    Failed,
}

impl SessionState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Idle,
        Self::Creating,
        Self::Joining,
        Self::Active,
        Self::Leaving,
        Self::Removing,
        Self::Failed,
    ];

    /// Returns `true` if `self → target` is in the transition table.
    pub fn can_transition_to(self, target: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Idle, Creating | Joining)
                | (Creating, Active | Failed)
                | (Joining, Active | Failed)
                | (Active, Leaving | Removing | Failed)
                | (Leaving, Idle | Failed)
                | (Removing, Idle | Failed)
                | (Failed, Idle)
        )
    }

    /// States that wait on a remote operation and carry a timeout.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Joining | Self::Leaving | Self::Removing
        )
    }

    /// `true` while a session is held (or being acquired/released).
    pub fn has_session(self) -> bool {
        !matches!(self, Self::Idle | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Creating => "Creating",
            Self::Joining => "Joining",
            Self::Active => "Active",
            Self::Leaving => "Leaving",
            Self::Removing => "Removing",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// TransportState
// ---------------------------------------------------------------------------

/// The network connection lifecycle.
///
/// Reconnection is not modelled: `Disconnected` and `Failed` only lead
/// back to `Idle` (or, from `Disconnected`, straight into a fresh
/// `Connecting` attempt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Failed,
}

impl TransportState {
    pub const ALL: [Self; 6] = [
        Self::Idle,
        Self::Connecting,
        Self::Connected,
        Self::Disconnecting,
        Self::Disconnected,
        Self::Failed,
    ];

    pub fn can_transition_to(self, target: Self) -> bool {
        use TransportState::*;
        matches!(
            (self, target),
            (Idle, Connecting)
                | (Connecting, Connected | Failed | Disconnecting | Disconnected)
                | (Connected, Disconnecting | Disconnected | Failed)
                | (Disconnecting, Disconnected | Failed)
                | (Disconnected, Idle | Connecting)
                | (Failed, Idle)
        )
    }

    pub fn is_transitional(self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }

    /// `Disconnected` and `Failed` both need the same cleanup.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnecting => "Disconnecting",
            Self::Disconnected => "Disconnected",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}
