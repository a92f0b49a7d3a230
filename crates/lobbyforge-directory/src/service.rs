//! The remote directory seam.
//!
//! Lobbyforge doesn't talk to any particular backend. Instead it defines
//! [`DirectoryService`]: one async method per remote endpoint. You
//! implement it over whatever your directory speaks (HTTP, gRPC, a vendor
//! SDK) and hand an `Arc<dyn DirectoryService>` to the orchestrator.
//!
//! # Why `async_trait`?
//!
//! The service is injected as a trait object so tests can swap in
//! [`MemoryDirectory`](crate::MemoryDirectory) without making every
//! layer above generic. Native `async fn` in traits isn't object safe;
//! `async_trait` boxes the futures and makes them `Send`, which the
//! runtime's spawned loop requires.

use std::collections::BTreeMap;

use async_trait::async_trait;
use lobbyforge_protocol::{
    Participant, ParticipantId, ParticipantPatch, Session, SessionId,
    SessionPatch,
};

use crate::DirectoryError;

/// Parameters for creating a session. The caller becomes the host.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub name: String,
    pub max_participants: u32,
    /// The creating participant, with their initial data bag.
    pub host: Participant,
    pub metadata: BTreeMap<String, String>,
}

/// Parameters for joining a session by its short code.
#[derive(Debug, Clone)]
pub struct JoinSessionRequest {
    pub join_code: String,
    pub password: Option<String>,
    /// The joining participant, with their initial data bag.
    pub participant: Participant,
}

/// One method per remote directory endpoint.
///
/// Every method is a single round-trip. Implementations must not retry
/// and must report expected failures as [`DirectoryError`] values rather
/// than panicking. `caller` is the identity the request is made on
/// behalf of; the service uses it for host-only checks.
#[async_trait]
pub trait DirectoryService: Send + Sync + 'static {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<Session, DirectoryError>;

    async fn join_session(
        &self,
        request: JoinSessionRequest,
    ) -> Result<Session, DirectoryError>;

    /// Removes `participant`. A participant may remove themselves
    /// (leave); only the host may remove someone else (kick).
    async fn remove_participant(
        &self,
        session_id: &SessionId,
        caller: &ParticipantId,
        participant: &ParticipantId,
    ) -> Result<(), DirectoryError>;

    /// Deletes the session. Host only.
    async fn delete_session(
        &self,
        session_id: &SessionId,
        caller: &ParticipantId,
    ) -> Result<(), DirectoryError>;

    /// Host only.
    async fn update_session(
        &self,
        session_id: &SessionId,
        caller: &ParticipantId,
        patch: SessionPatch,
    ) -> Result<Session, DirectoryError>;

    /// The participant themselves, or the host.
    async fn update_participant(
        &self,
        session_id: &SessionId,
        caller: &ParticipantId,
        participant: &ParticipantId,
        patch: ParticipantPatch,
    ) -> Result<Session, DirectoryError>;

    async fn get_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Session, DirectoryError>;

    /// Keeps the session alive. Host only.
    async fn heartbeat(
        &self,
        session_id: &SessionId,
        caller: &ParticipantId,
    ) -> Result<(), DirectoryError>;
}
