//! Error types for the session layer.

use lobbyforge_protocol::{ErrorKind, SessionState};

/// Errors raised when a required transition can't happen.
///
/// [`SessionStateMachine::try_transition`](crate::SessionStateMachine::try_transition)
/// itself just returns `false`; callers that need a reason use
/// [`transition`](crate::SessionStateMachine::transition) instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The transition isn't in the table.
    #[error("cannot go from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// Another transition's hooks are still running.
    #[error("a session transition is already in progress")]
    TransitionInProgress,

    /// The machine was force-reset while this transition ran.
    #[error("session transition superseded by a reset")]
    Superseded,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTransition { .. } => ErrorKind::InvalidState,
            Self::TransitionInProgress => ErrorKind::Busy,
            Self::Superseded => ErrorKind::Cancelled,
        }
    }
}
