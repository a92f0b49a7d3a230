//! An in-process [`DirectoryService`].
//!
//! `MemoryDirectory` behaves like a small directory backend: join codes,
//! passwords, capacity limits, host-only checks, host migration when the
//! host leaves, and expiry of sessions whose host stops heartbeating.
//!
//! It also lets tests script the remote side:
//! - [`fail_next`](MemoryDirectory::fail_next) queues an error for the
//!   next call of one operation
//! - [`hang`](MemoryDirectory::hang) makes an operation pend until
//!   [`unhang`](MemoryDirectory::unhang) or until the caller cancels
//! - the `remote_*` helpers act as *another* participant would, e.g. a
//!   host publishing its relay code or deleting the session

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lobbyforge_protocol::{
    Participant, ParticipantId, ParticipantPatch, Session, SessionId,
    SessionPatch,
};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{
    CreateSessionRequest, DirectoryError, DirectoryService, JoinSessionRequest,
};

/// Alphabet for join codes: no 0/O or 1/I lookalikes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Names each remote operation, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryOp {
    Create,
    Join,
    RemoveParticipant,
    Delete,
    UpdateSession,
    UpdateParticipant,
    Get,
    Heartbeat,
}

/// Settings for [`MemoryDirectory`].
#[derive(Debug, Clone)]
pub struct MemoryDirectoryConfig {
    /// Sessions whose host hasn't heartbeated within this window vanish.
    /// `None` disables expiry.
    pub session_ttl: Option<Duration>,
}

impl Default for MemoryDirectoryConfig {
    fn default() -> Self {
        Self {
            session_ttl: Some(Duration::from_secs(30)),
        }
    }
}

struct StoredSession {
    session: Session,
    last_heartbeat: Instant,
}

#[derive(Default)]
struct State {
    sessions: HashMap<SessionId, StoredSession>,
    /// Join code → session id, kept in sync with `sessions`.
    codes: HashMap<String, SessionId>,
    faults: HashMap<DirectoryOp, VecDeque<DirectoryError>>,
    hung: HashSet<DirectoryOp>,
    calls: HashMap<DirectoryOp, usize>,
}

impl State {
    fn expire(&mut self, ttl: Option<Duration>) {
        let Some(ttl) = ttl else { return };
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.last_heartbeat.elapsed() > ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            tracing::debug!(session_id = %id, "memory directory: session expired");
            self.drop_session(&id);
        }
    }

    fn drop_session(&mut self, id: &SessionId) -> Option<StoredSession> {
        let stored = self.sessions.remove(id)?;
        self.codes.remove(&stored.session.join_code);
        Some(stored)
    }

    fn get_mut(
        &mut self,
        id: &SessionId,
    ) -> Result<&mut StoredSession, DirectoryError> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))
    }

    fn unique_code(&self) -> String {
        let mut rng = rand::rng();
        loop {
            let code: String = (0..CODE_LEN)
                .map(|_| {
                    CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]
                        as char
                })
                .collect();
            if !self.codes.contains_key(&code) {
                return code;
            }
        }
    }
}

/// A complete directory held in memory. Cheap to share behind an `Arc`.
pub struct MemoryDirectory {
    config: MemoryDirectoryConfig,
    state: Mutex<State>,
    unhung: Notify,
}

impl MemoryDirectory {
    pub fn new(config: MemoryDirectoryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            unhung: Notify::new(),
        }
    }

    // -- Fault injection --------------------------------------------------

    /// The next call of `op` fails with `error`. Queued errors are
    /// consumed in order.
    pub fn fail_next(&self, op: DirectoryOp, error: DirectoryError) {
        self.state
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Every call of `op` pends until [`unhang`](Self::unhang).
    pub fn hang(&self, op: DirectoryOp) {
        self.state.lock().hung.insert(op);
    }

    /// Releases calls of `op` already pending and lets new ones through.
    pub fn unhang(&self, op: DirectoryOp) {
        self.state.lock().hung.remove(&op);
        self.unhung.notify_waiters();
    }

    /// How many times `op` has been called (including failed calls).
    pub fn calls(&self, op: DirectoryOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    // -- Remote-side helpers ----------------------------------------------

    /// Current stored snapshot, bypassing fault injection.
    pub fn snapshot(&self, id: &SessionId) -> Option<Session> {
        self.state.lock().sessions.get(id).map(|s| s.session.clone())
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Applies a patch as the host would, bypassing permission checks.
    pub fn remote_update_session(&self, id: &SessionId, patch: SessionPatch) {
        if let Some(stored) = self.state.lock().sessions.get_mut(id) {
            patch.apply_to(&mut stored.session);
        }
    }

    /// Adds a participant as if they had joined from elsewhere.
    pub fn remote_add_participant(&self, id: &SessionId, participant: Participant) {
        if let Some(stored) = self.state.lock().sessions.get_mut(id) {
            if !stored.session.contains(&participant.id) {
                stored.session.participants.push(participant);
            }
        }
    }

    /// Removes a participant as if they had left from elsewhere,
    /// migrating the host if needed.
    pub fn remote_remove_participant(&self, id: &SessionId, participant: &ParticipantId) {
        let mut state = self.state.lock();
        let empty = match state.sessions.get_mut(id) {
            Some(stored) => {
                remove_and_migrate(&mut stored.session, participant);
                stored.session.participants.is_empty()
            }
            None => return,
        };
        if empty {
            state.drop_session(id);
        }
    }

    /// Deletes a session as the host would.
    pub fn remote_delete_session(&self, id: &SessionId) {
        self.state.lock().drop_session(id);
    }

    // -- Internals ----------------------------------------------------------

    /// Records the call and returns an injected fault, if any. Hung
    /// operations are reported separately so the lock isn't held while
    /// pending.
    fn enter(&self, op: DirectoryOp) -> Result<bool, DirectoryError> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(error) = state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(state.hung.contains(&op))
    }

    async fn begin(&self, op: DirectoryOp) -> Result<(), DirectoryError> {
        if !self.enter(op)? {
            return Ok(());
        }
        loop {
            // Registered before the check so an unhang in between isn't missed.
            let unhung = self.unhung.notified();
            if !self.state.lock().hung.contains(&op) {
                return Ok(());
            }
            unhung.await;
        }
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new(MemoryDirectoryConfig::default())
    }
}

/// Removes `participant`; if they were host, the longest-standing
/// remaining participant takes over.
fn remove_and_migrate(session: &mut Session, participant: &ParticipantId) -> bool {
    let before = session.participants.len();
    session.participants.retain(|p| &p.id != participant);
    let removed = session.participants.len() != before;
    if removed && &session.host_id == participant {
        if let Some(next) = session.participants.first() {
            tracing::debug!(
                session_id = %session.id,
                previous = %participant,
                current = %next.id,
                "memory directory: host migrated"
            );
            session.host_id = next.id.clone();
        }
    }
    removed
}

#[async_trait]
impl DirectoryService for MemoryDirectory {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<Session, DirectoryError> {
        self.begin(DirectoryOp::Create).await?;

        let mut state = self.state.lock();
        state.expire(self.config.session_ttl);

        let n = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let id = SessionId::new(format!("sess-{n:06}"));
        let code = state.unique_code();

        let session = Session {
            id: id.clone(),
            join_code: code.clone(),
            name: request.name,
            host_id: request.host.id.clone(),
            max_participants: request.max_participants,
            metadata: request.metadata,
            participants: vec![request.host],
        };
        state.codes.insert(code, id.clone());
        state.sessions.insert(
            id,
            StoredSession {
                session: session.clone(),
                last_heartbeat: Instant::now(),
            },
        );
        Ok(session)
    }

    async fn join_session(
        &self,
        request: JoinSessionRequest,
    ) -> Result<Session, DirectoryError> {
        self.begin(DirectoryOp::Join).await?;

        let mut state = self.state.lock();
        state.expire(self.config.session_ttl);

        let id = state
            .codes
            .get(&request.join_code)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(request.join_code.clone()))?;
        let stored = state.get_mut(&id)?;
        let session = &mut stored.session;

        if let Some(expected) = session.password() {
            if request.password.as_deref() != Some(expected) {
                return Err(DirectoryError::Forbidden("incorrect password".into()));
            }
        }
        if session.contains(&request.participant.id) {
            return Ok(session.clone());
        }
        if session.is_full() {
            return Err(DirectoryError::Conflict("session is full".into()));
        }

        session.participants.push(request.participant);
        Ok(session.clone())
    }

    async fn remove_participant(
        &self,
        session_id: &SessionId,
        caller: &ParticipantId,
        participant: &ParticipantId,
    ) -> Result<(), DirectoryError> {
        self.begin(DirectoryOp::RemoveParticipant).await?;

        let mut state = self.state.lock();
        state.expire(self.config.session_ttl);

        let stored = state.get_mut(session_id)?;
        let session = &mut stored.session;
        if caller != participant && !session.is_host(caller) {
            return Err(DirectoryError::Forbidden(
                "only the host can remove other participants".into(),
            ));
        }
        if !remove_and_migrate(session, participant) {
            return Err(DirectoryError::NotFound(participant.to_string()));
        }
        if session.participants.is_empty() {
            state.drop_session(session_id);
        }
        Ok(())
    }

    async fn delete_session(
        &self,
        session_id: &SessionId,
        caller: &ParticipantId,
    ) -> Result<(), DirectoryError> {
        self.begin(DirectoryOp::Delete).await?;

        let mut state = self.state.lock();
        state.expire(self.config.session_ttl);

        if !state.get_mut(session_id)?.session.is_host(caller) {
            return Err(DirectoryError::Forbidden(
                "only the host can delete the session".into(),
            ));
        }
        state.drop_session(session_id);
        Ok(())
    }

    async fn update_session(
        &self,
        session_id: &SessionId,
        caller: &ParticipantId,
        patch: SessionPatch,
    ) -> Result<Session, DirectoryError> {
        self.begin(DirectoryOp::UpdateSession).await?;

        let mut state = self.state.lock();
        state.expire(self.config.session_ttl);

        let session = &mut state.get_mut(session_id)?.session;
        if !session.is_host(caller) {
            return Err(DirectoryError::Forbidden(
                "only the host can update the session".into(),
            ));
        }
        if let Some(max) = patch.max_participants {
            if (max as usize) < session.participants.len() {
                return Err(DirectoryError::Validation(format!(
                    "max participants {max} is below current count {}",
                    session.participants.len()
                )));
            }
        }
        patch.apply_to(session);
        Ok(session.clone())
    }

    async fn update_participant(
        &self,
        session_id: &SessionId,
        caller: &ParticipantId,
        participant: &ParticipantId,
        patch: ParticipantPatch,
    ) -> Result<Session, DirectoryError> {
        self.begin(DirectoryOp::UpdateParticipant).await?;

        let mut state = self.state.lock();
        state.expire(self.config.session_ttl);

        let session = &mut state.get_mut(session_id)?.session;
        if caller != participant && !session.is_host(caller) {
            return Err(DirectoryError::Forbidden(
                "cannot update another participant".into(),
            ));
        }
        let entry = session
            .participants
            .iter_mut()
            .find(|p| &p.id == participant)
            .ok_or_else(|| DirectoryError::NotFound(participant.to_string()))?;
        patch.apply_to(entry);
        Ok(session.clone())
    }

    async fn get_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Session, DirectoryError> {
        self.begin(DirectoryOp::Get).await?;

        let mut state = self.state.lock();
        state.expire(self.config.session_ttl);
        Ok(state.get_mut(session_id)?.session.clone())
    }

    async fn heartbeat(
        &self,
        session_id: &SessionId,
        caller: &ParticipantId,
    ) -> Result<(), DirectoryError> {
        self.begin(DirectoryOp::Heartbeat).await?;

        let mut state = self.state.lock();
        state.expire(self.config.session_ttl);

        let stored = state.get_mut(session_id)?;
        if !stored.session.is_host(caller) {
            return Err(DirectoryError::Forbidden(
                "only the host sends heartbeats".into(),
            ));
        }
        stored.last_heartbeat = Instant::now();
        Ok(())
    }
}
