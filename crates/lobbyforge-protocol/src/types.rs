//! Core data model shared by every Lobbyforge layer.
//!
//! A [`Session`] is always a *snapshot*: the directory hands us a fresh
//! one on every call and the previous one is replaced wholesale. Nothing
//! in this module patches a snapshot in place except the in-memory
//! directory, which plays the part of the remote service.
//!
//! Two identity spaces exist side by side:
//!
//! - [`ParticipantId`]: issued by the session directory (opaque string).
//! - [`ConnectionId`]: issued by the transport once a peer connects.
//!
//! They are reconciled by the identity registry in `lobbyforge-session`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifier of a session in the remote directory.
///
/// Newtype over `String` so it can't be confused with a participant id,
/// even though both are opaque strings on the wire.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Creates a `SessionId` from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A participant's identity as issued by the session directory.
///
/// This is the identity that matters for membership: two participants
/// are the same participant iff their `ParticipantId`s are equal. The
/// transport-layer [`ConnectionId`] is assigned later and may not exist.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    /// Creates a `ParticipantId` from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier for a transport connection.
///
/// Assigned by the transport driver when a peer (or the local client)
/// connects through the relay.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Metadata key conventions
// ---------------------------------------------------------------------------

/// Session-level metadata keys (string → string). All optional.
pub mod metadata {
    /// Join password, visible to members.
    pub const PASSWORD: &str = "Password";
    /// One of `waiting/starting/playing/finished/cancelled`.
    pub const PHASE: &str = "Phase";
    /// Published by the host once the relay allocation succeeds.
    pub const RELAY_JOIN_CODE: &str = "RelayJoinCode";
    /// One of `connecting/connected/ready/failed/disconnected`.
    pub const NETWORK_STATUS: &str = "NetworkStatus";
    pub const GAME_MODE: &str = "GameMode";
    pub const MAP_NAME: &str = "MapName";
    pub const CREATED_AT: &str = "CreatedAt";
}

/// Per-participant data keys.
pub mod participant_data {
    pub const DISPLAY_NAME: &str = "DisplayName";
    /// `"true"` or `"false"`.
    pub const IS_READY: &str = "IsReady";
    pub const PLAYER_ROLE: &str = "PlayerRole";
    pub const TEAM_ID: &str = "TeamId";
}

// ---------------------------------------------------------------------------
// SessionPhase / NetworkStatus
// ---------------------------------------------------------------------------

/// The game phase a session advertises through its `Phase` key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Waiting,
    Starting,
    Playing,
    Finished,
    Cancelled,
}

impl SessionPhase {
    /// The value stored under [`metadata::PHASE`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Starting => "starting",
            Self::Playing => "playing",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "waiting" => Ok(Self::Waiting),
            "starting" => Ok(Self::Starting),
            "playing" => Ok(Self::Playing),
            "finished" => Ok(Self::Finished),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown session phase: {other}")),
        }
    }
}

/// Network readiness the host publishes under [`metadata::NETWORK_STATUS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Connecting,
    Connected,
    Ready,
    Failed,
    Disconnected,
}

impl NetworkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            "disconnected" => Ok(Self::Disconnected),
            other => Err(format!("unknown network status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// One member of a session.
///
/// Everything except the identity lives in the `data` bag, using the
/// [`participant_data`] key convention. Equality and hashing consider
/// only `id`; compare `data` explicitly when you care about changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Directory-issued identity.
    pub id: ParticipantId,
    /// Per-participant key-value bag.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Participant {
    /// Creates a participant with an empty data bag.
    pub fn new(id: ParticipantId) -> Self {
        Self {
            id,
            data: BTreeMap::new(),
        }
    }

    /// Builder-style setter for a data key.
    pub fn with_data(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Returns the display name, if one was published.
    pub fn display_name(&self) -> Option<&str> {
        self.data
            .get(participant_data::DISPLAY_NAME)
            .map(String::as_str)
    }

    /// `true` only when `IsReady` is literally `"true"`.
    pub fn is_ready(&self) -> bool {
        self.data
            .get(participant_data::IS_READY)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn role(&self) -> Option<&str> {
        self.data.get(participant_data::PLAYER_ROLE).map(String::as_str)
    }

    pub fn team_id(&self) -> Option<&str> {
        self.data
            .get(participant_data::TEAM_ID)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

impl PartialEq for Participant {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Participant {}

impl std::hash::Hash for Participant {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A snapshot of a session as returned by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Short human-shareable code used by `JoinSession`.
    pub join_code: String,
    pub name: String,
    pub host_id: ParticipantId,
    pub max_participants: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Ordered by join time; the directory keeps the order stable.
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl Session {
    /// Returns a metadata value, treating empty strings as absent.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// The advertised phase. Missing or unparseable values read as
    /// [`SessionPhase::Waiting`].
    pub fn phase(&self) -> SessionPhase {
        self.metadata_value(metadata::PHASE)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    /// The relay join code, once the host has published one.
    pub fn relay_join_code(&self) -> Option<&str> {
        self.metadata_value(metadata::RELAY_JOIN_CODE)
    }

    pub fn password(&self) -> Option<&str> {
        self.metadata_value(metadata::PASSWORD)
    }

    pub fn network_status(&self) -> Option<NetworkStatus> {
        self.metadata_value(metadata::NETWORK_STATUS)
            .and_then(|v| v.parse().ok())
    }

    /// Looks up a participant by directory identity.
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participant(id).is_some()
    }

    pub fn is_host(&self, id: &ParticipantId) -> bool {
        &self.host_id == id
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.max_participants as usize
    }

    /// `true` when every participant has flagged ready.
    pub fn all_ready(&self) -> bool {
        !self.participants.is_empty()
            && self.participants.iter().all(Participant::is_ready)
    }
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// A partial update to a session. `None` values in `metadata` delete
/// the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPatch {
    pub name: Option<String>,
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Option<String>>,
}

impl SessionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn max_participants(mut self, max: u32) -> Self {
        self.max_participants = Some(max);
        self
    }

    pub fn set(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.metadata.insert(key.into(), Some(value.into()));
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.max_participants.is_none()
            && self.metadata.is_empty()
    }

    /// Applies the patch to a snapshot. Used by directory implementations.
    pub fn apply_to(&self, session: &mut Session) {
        if let Some(name) = &self.name {
            session.name = name.clone();
        }
        if let Some(max) = self.max_participants {
            session.max_participants = max;
        }
        apply_data(&mut session.metadata, &self.metadata);
    }
}

/// A partial update to one participant's data bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantPatch {
    #[serde(default)]
    pub data: BTreeMap<String, Option<String>>,
}

impl ParticipantPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.data.insert(key.into(), Some(value.into()));
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.data.insert(key.into(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn apply_to(&self, participant: &mut Participant) {
        apply_data(&mut participant.data, &self.data);
    }
}

fn apply_data(
    bag: &mut BTreeMap<String, String>,
    patch: &BTreeMap<String, Option<String>>,
) {
    for (key, value) in patch {
        match value {
            Some(v) => {
                bag.insert(key.clone(), v.clone());
            }
            None => {
                bag.remove(key);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Relay → transport configuration
// ---------------------------------------------------------------------------

/// Which side of the relay a transport configuration is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportRole {
    Host,
    Client,
}

impl fmt::Display for TransportRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// Where the relay server for an allocation lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEndpoint {
    pub host: String,
    pub port: u16,
    /// `true` for DTLS/secure websocket endpoints.
    pub secure: bool,
}

impl fmt::Display for RelayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything a transport driver needs to bind to a relay allocation.
///
/// Produced by the relay coordinator, consumed by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub role: TransportRole,
    pub allocation_id: String,
    pub endpoint: RelayEndpoint,
    /// Opaque per-allocation connection blob.
    pub connection_data: Vec<u8>,
    /// The host's connection blob; only present for clients.
    pub host_connection_data: Option<Vec<u8>>,
    /// HMAC key the relay uses to authenticate this allocation.
    pub key: Vec<u8>,
    pub max_connections: u32,
}

// ---------------------------------------------------------------------------
// Identity handshake
// ---------------------------------------------------------------------------

/// Messages exchanged over a freshly connected transport to tie a
/// [`ConnectionId`] to a [`ParticipantId`].
///
/// ```text
/// client ──Hello { participant_id }──→ host     (host registers client)
/// client ←─Welcome { participant_id }── host    (client registers host)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HandshakeMessage {
    /// Client → host: "this connection belongs to `participant_id`."
    Hello { participant_id: ParticipantId },
    /// Host → client: acknowledgement carrying the host's own identity.
    Welcome { participant_id: ParticipantId },
}
