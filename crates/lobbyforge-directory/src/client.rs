//! The directory client: a thin, stateless-ish wrapper over
//! [`DirectoryService`].
//!
//! What it adds on top of the raw service:
//! - input validation, so bad requests never leave the process
//! - the local participant's identity and profile on every request
//! - the current session id, for the `*_current` convenience calls
//!
//! What it deliberately does not do: retry, cache snapshots, or decide
//! what an error means. Errors pass through unmodified.

use std::collections::BTreeMap;
use std::sync::Arc;

use lobbyforge_protocol::{
    Participant, ParticipantId, ParticipantPatch, Session, SessionId,
    SessionPatch,
};
use parking_lot::Mutex;

use crate::{
    CreateSessionRequest, DirectoryError, DirectoryService, JoinSessionRequest,
};

const MAX_NAME_LEN: usize = 64;
const MIN_PARTICIPANTS: u32 = 2;
const MAX_PARTICIPANTS: u32 = 100;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 64;
const MAX_JOIN_CODE_LEN: usize = 16;

/// Client for the remote session directory.
pub struct DirectoryClient {
    service: Arc<dyn DirectoryService>,
    local: ParticipantId,
    /// Initial data bag sent when creating or joining.
    profile: Mutex<BTreeMap<String, String>>,
    current: Mutex<Option<SessionId>>,
}

impl DirectoryClient {
    /// Creates a client that acts on behalf of `local`.
    pub fn new(service: Arc<dyn DirectoryService>, local: ParticipantId) -> Self {
        Self {
            service,
            local,
            profile: Mutex::new(BTreeMap::new()),
            current: Mutex::new(None),
        }
    }

    /// Sets a key in the profile published on the next create/join.
    pub fn set_profile_value(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.profile.lock().insert(key.into(), value.into());
    }

    pub fn local_participant(&self) -> &ParticipantId {
        &self.local
    }

    /// The session most recently created or joined, if any.
    pub fn current_session(&self) -> Option<SessionId> {
        self.current.lock().clone()
    }

    /// Forgets the current session id without any remote call.
    pub fn clear_current(&self) {
        self.current.lock().take();
    }

    fn local_participant_record(&self) -> Participant {
        Participant {
            id: self.local.clone(),
            data: self.profile.lock().clone(),
        }
    }

    fn current_or_err(&self) -> Result<SessionId, DirectoryError> {
        self.current_session().ok_or(DirectoryError::NoCurrentSession)
    }

    // -- Session lifecycle ------------------------------------------------

    /// Creates a session hosted by the local participant.
    pub async fn create_session(
        &self,
        name: &str,
        max_participants: u32,
        metadata: BTreeMap<String, String>,
    ) -> Result<Session, DirectoryError> {
        validate_session_name(name)?;
        validate_max_participants(max_participants)?;
        if let Some(pwd) = metadata.get(lobbyforge_protocol::metadata::PASSWORD)
        {
            validate_password(pwd)?;
        }

        let request = CreateSessionRequest {
            name: name.trim().to_string(),
            max_participants,
            host: self.local_participant_record(),
            metadata,
        };
        let session = self
            .service
            .create_session(request)
            .await
            .inspect_err(|e| tracing::debug!(error = %e, "create_session failed"))?;

        tracing::info!(session_id = %session.id, code = %session.join_code, "session created");
        *self.current.lock() = Some(session.id.clone());
        Ok(session)
    }

    /// Joins a session by its short code.
    pub async fn join_session(
        &self,
        code: &str,
        password: &str,
    ) -> Result<Session, DirectoryError> {
        validate_join_code(code)?;

        let request = JoinSessionRequest {
            join_code: code.trim().to_ascii_uppercase(),
            password: (!password.is_empty()).then(|| password.to_string()),
            participant: self.local_participant_record(),
        };
        let session = self
            .service
            .join_session(request)
            .await
            .inspect_err(|e| tracing::debug!(error = %e, code, "join_session failed"))?;

        tracing::info!(session_id = %session.id, "session joined");
        *self.current.lock() = Some(session.id.clone());
        Ok(session)
    }

    /// Removes `participant` from the session (normally the local one).
    pub async fn leave_session(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), DirectoryError> {
        self.service
            .remove_participant(session_id, &self.local, participant)
            .await
            .inspect_err(|e| tracing::debug!(error = %e, %session_id, "leave_session failed"))?;
        self.forget_if_current(session_id);
        Ok(())
    }

    /// Leaves the current session as the local participant.
    pub async fn leave_current(&self) -> Result<(), DirectoryError> {
        let id = self.current_or_err()?;
        let local = self.local.clone();
        self.leave_session(&id, &local).await
    }

    /// Deletes the session. Host only.
    pub async fn remove_session(
        &self,
        session_id: &SessionId,
    ) -> Result<(), DirectoryError> {
        self.service
            .delete_session(session_id, &self.local)
            .await
            .inspect_err(|e| tracing::debug!(error = %e, %session_id, "remove_session failed"))?;
        self.forget_if_current(session_id);
        Ok(())
    }

    /// Removes another participant. Host only.
    pub async fn kick_participant(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), DirectoryError> {
        if participant == &self.local {
            return Err(DirectoryError::Validation(
                "cannot kick yourself; leave instead".into(),
            ));
        }
        self.service
            .remove_participant(session_id, &self.local, participant)
            .await
            .inspect_err(|e| tracing::debug!(error = %e, %session_id, %participant, "kick failed"))
    }

    // -- Updates ----------------------------------------------------------

    pub async fn update_session(
        &self,
        session_id: &SessionId,
        patch: SessionPatch,
    ) -> Result<Session, DirectoryError> {
        if let Some(name) = &patch.name {
            validate_session_name(name)?;
        }
        if let Some(max) = patch.max_participants {
            validate_max_participants(max)?;
        }
        if let Some(Some(pwd)) =
            patch.metadata.get(lobbyforge_protocol::metadata::PASSWORD)
        {
            validate_password(pwd)?;
        }
        self.service
            .update_session(session_id, &self.local, patch)
            .await
            .inspect_err(|e| tracing::debug!(error = %e, %session_id, "update_session failed"))
    }

    pub async fn update_current(
        &self,
        patch: SessionPatch,
    ) -> Result<Session, DirectoryError> {
        let id = self.current_or_err()?;
        self.update_session(&id, patch).await
    }

    pub async fn update_participant(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
        patch: ParticipantPatch,
    ) -> Result<Session, DirectoryError> {
        self.service
            .update_participant(session_id, &self.local, participant, patch)
            .await
            .inspect_err(|e| tracing::debug!(error = %e, %session_id, "update_participant failed"))
    }

    // -- Reads / liveness -------------------------------------------------

    pub async fn get_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Session, DirectoryError> {
        self.service.get_session(session_id).await
    }

    pub async fn get_current(&self) -> Result<Session, DirectoryError> {
        let id = self.current_or_err()?;
        self.get_session(&id).await
    }

    pub async fn heartbeat(
        &self,
        session_id: &SessionId,
    ) -> Result<(), DirectoryError> {
        self.service.heartbeat(session_id, &self.local).await
    }

    fn forget_if_current(&self, session_id: &SessionId) {
        let mut current = self.current.lock();
        if current.as_ref() == Some(session_id) {
            *current = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub fn validate_session_name(name: &str) -> Result<(), DirectoryError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DirectoryError::Validation("session name is empty".into()));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(DirectoryError::Validation(format!(
            "session name longer than {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_max_participants(max: u32) -> Result<(), DirectoryError> {
    if !(MIN_PARTICIPANTS..=MAX_PARTICIPANTS).contains(&max) {
        return Err(DirectoryError::Validation(format!(
            "max participants must be {MIN_PARTICIPANTS}-{MAX_PARTICIPANTS}, got {max}"
        )));
    }
    Ok(())
}

/// Empty means "no password"; otherwise 8–64 characters.
pub fn validate_password(password: &str) -> Result<(), DirectoryError> {
    let len = password.chars().count();
    if len != 0 && !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(DirectoryError::Validation(format!(
            "password must be {MIN_PASSWORD_LEN}-{MAX_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_join_code(code: &str) -> Result<(), DirectoryError> {
    let code = code.trim();
    if code.is_empty()
        || code.len() > MAX_JOIN_CODE_LEN
        || !code.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(DirectoryError::Validation(format!(
            "join code must be 1-{MAX_JOIN_CODE_LEN} alphanumeric characters"
        )));
    }
    Ok(())
}
