use lobbyforge_protocol::{ConnectionId, ErrorKind};

/// Errors that can occur in the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The driver couldn't bind to the relay allocation.
    #[error("transport start failed: {0}")]
    StartFailed(String),

    /// `start_*` was called on a driver that is already running.
    #[error("transport already started")]
    AlreadyStarted,

    /// An operation needed a running transport.
    #[error("transport not started")]
    NotStarted,

    /// The target connection isn't (or is no longer) connected.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StartFailed(_)
            | Self::SendFailed(_)
            | Self::ConnectionClosed(_) => ErrorKind::Transient,
            Self::AlreadyStarted | Self::NotStarted => ErrorKind::InvalidState,
            Self::UnknownConnection(_) => ErrorKind::NotFound,
        }
    }
}
