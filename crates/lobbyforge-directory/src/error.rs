//! Error types for the directory layer.

use std::time::Duration;

use lobbyforge_protocol::ErrorKind;

/// A classified directory failure.
///
/// Directory implementations map their transport/HTTP errors onto these
/// variants; callers branch on [`kind`](Self::kind). `Clone` so fakes can
/// hand out the same injected failure more than once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The session (or participant) doesn't exist any more.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller isn't allowed to do this (e.g. a non-host kicking).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Network failure or a 5xx-equivalent; worth retrying later.
    #[error("directory unavailable: {0}")]
    Transient(String),

    /// The service is throttling us.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Input rejected before or by the service.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The request conflicts with the session's state (e.g. full).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A convenience call was made with no current session.
    #[error("no current session")]
    NoCurrentSession,
}

impl DirectoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Transient(_) => ErrorKind::Transient,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) | Self::NoCurrentSession => {
                ErrorKind::InvalidState
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// The service's requested wait, when it gave one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
