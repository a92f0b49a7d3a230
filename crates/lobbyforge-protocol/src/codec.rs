//! Codec trait and implementations for the transport handshake.
//!
//! Only the identity handshake travels through this crate's codecs;
//! gameplay traffic over the transport is the application's business.
//! The [`Codec`] trait keeps the encoding swappable (a binary codec can
//! replace [`JsonCodec`] without touching the orchestrator).

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to bytes and decodes them back.
///
/// `Send + Sync + 'static` because the orchestrator keeps one codec for
/// its whole lifetime and uses it from spawned tasks.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or
    /// don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

/// A [`Codec`] backed by `serde_json`.
///
/// ## Example
///
/// ```rust
/// use lobbyforge_protocol::{Codec, HandshakeMessage, JsonCodec, ParticipantId};
///
/// let codec = JsonCodec;
/// let hello = HandshakeMessage::Hello {
///     participant_id: ParticipantId::new("player-7"),
/// };
///
/// let bytes = codec.encode(&hello).unwrap();
/// let decoded: HandshakeMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(hello, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
