use std::time::Duration;

use lobbyforge_protocol::ErrorKind;

/// Errors from the relay layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The join code (or allocation) is unknown or has expired.
    #[error("relay allocation not found: {0}")]
    NotFound(String),

    /// Network failure talking to the relay service.
    #[error("relay service unavailable: {0}")]
    Transient(String),

    #[error("relay service rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// The allocation has no free connection slots.
    #[error("relay allocation full: {0}")]
    Full(String),

    /// Input rejected before reaching the service.
    #[error("invalid relay request: {0}")]
    Validation(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Transient(_) => ErrorKind::Transient,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Full(_) => ErrorKind::InvalidState,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }
}
