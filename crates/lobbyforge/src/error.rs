//! Unified error type for Lobbyforge.

use lobbyforge_directory::DirectoryError;
use lobbyforge_protocol::{ErrorKind, ProtocolError, SessionState, TransportState};
use lobbyforge_relay::RelayError;
use lobbyforge_session::SessionError;
use lobbyforge_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `lobbyforge` crate you deal with this single error
/// type instead of importing errors from each layer. The `#[from]`
/// attribute on each layer variant auto-generates `From` impls, so the
/// `?` operator converts them automatically.
///
/// Its `Display` output is for logs. For anything a player sees, use
/// [`summary`](Self::summary) together with [`kind`](Self::kind).
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    /// A session directory call failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// A relay allocation or join failed.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The transport failed to start or send.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The lobby state machine refused a transition.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A handshake message could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Another create/join/leave/remove is still running.
    #[error("another operation is in progress")]
    Busy,

    /// The operation was cancelled by a reset, a timeout or shutdown.
    #[error("operation cancelled")]
    Cancelled,

    /// A host-only command was issued by a non-host.
    #[error("only the host can {0}")]
    NotHost(&'static str),

    /// The command needs a state the lobby isn't in.
    #[error("cannot {action} while {state}")]
    WrongState {
        action: &'static str,
        state: SessionState,
    },

    /// The transport settled somewhere other than `Connected`.
    #[error("transport ended {0} before connecting")]
    NotConnected(TransportState),

    /// The runtime stopped before the host published a relay code.
    #[error("session ended while waiting for the host")]
    SessionEnded,

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LobbyError {
    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Directory(e) => e.kind(),
            Self::Relay(e) => e.kind(),
            Self::Transport(e) => e.kind(),
            Self::Session(e) => e.kind(),
            Self::Protocol(e) => e.kind(),
            Self::Busy => ErrorKind::Busy,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NotHost(_) => ErrorKind::Forbidden,
            Self::WrongState { .. } => ErrorKind::InvalidState,
            Self::NotConnected(TransportState::Failed) => ErrorKind::Timeout,
            Self::NotConnected(_) => ErrorKind::Transient,
            Self::SessionEnded => ErrorKind::NotFound,
            Self::Config(_) => ErrorKind::Validation,
        }
    }

    /// One short sentence fit to show a player.
    ///
    /// Remote error text never leaks through here; only validation
    /// messages (which this crate writes itself) are passed on.
    pub fn summary(&self) -> String {
        match self.kind() {
            ErrorKind::NotFound => "That session no longer exists.".into(),
            ErrorKind::Forbidden => "Only the host can do that.".into(),
            ErrorKind::Transient => {
                "Network problem, please try again.".into()
            }
            ErrorKind::RateLimited => {
                "Too many requests, please wait a moment.".into()
            }
            ErrorKind::Timeout => "The operation timed out.".into(),
            ErrorKind::Validation => match self {
                Self::Directory(DirectoryError::Validation(msg))
                | Self::Relay(RelayError::Validation(msg)) => {
                    format!("Invalid input: {msg}.")
                }
                _ => "Invalid input.".into(),
            },
            ErrorKind::Busy => {
                "Please wait for the current operation to finish.".into()
            }
            ErrorKind::Cancelled => "The operation was cancelled.".into(),
            ErrorKind::InvalidState => "That isn't possible right now.".into(),
        }
    }
}
