//! Error types for the protocol layer, plus the shared error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur while encoding or decoding handshake traffic.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed bytes, unknown tag, missing field.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded but violates the handshake rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

/// Coarse classification every Lobbyforge error maps onto.
///
/// Callers branch on the kind, never on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Session or participant no longer exists. Terminal.
    NotFound,
    /// Host-only operation attempted by a non-host.
    Forbidden,
    /// Network hiccup; worth retrying.
    Transient,
    /// The remote service asked us to slow down.
    RateLimited,
    /// A state was held longer than its budget.
    Timeout,
    /// Bad input, rejected before any remote call.
    Validation,
    /// Another orchestrated operation is already running.
    Busy,
    /// The operation's cancellation token fired.
    Cancelled,
    /// The request doesn't make sense in the current state.
    InvalidState,
}

impl ErrorKind {
    /// `true` for kinds a retry loop should back off and try again.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not-found",
            Self::Forbidden => "forbidden",
            Self::Transient => "transient",
            Self::RateLimited => "rate-limited",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::Busy => "busy",
            Self::Cancelled => "cancelled",
            Self::InvalidState => "invalid-state",
        };
        f.write_str(name)
    }
}
