//! Background work: state machine hooks, the transport event pump, the
//! event supervisor and the timeout ticker.
//!
//! Each spawned task runs until its cancellation token (a child of the
//! orchestrator's root token) fires, or for the runtime watcher, until
//! the runtime it watches exits:
//!
//! ```text
//!   TransportDriver ──mpsc──→ pump_transport ──→ TransportStateMachine
//!                                  │              IdentityRegistry (handshake)
//!                                  └──────────→ EventBus
//!   EventBus ──→ supervise ──→ snapshot cache, registry
//!   RuntimeHandle::exit_watch ──→ watch_runtime ──→ terminal failures
//!   Cadence  ──→ tick ──→ SessionStateMachine::tick / TransportStateMachine::tick
//! ```

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use lobbyforge_cadence::Cadence;
use lobbyforge_protocol::{
    Codec, ConnectionId, ErrorKind, EventSubscription, HandshakeMessage,
    LobbyEvent, SessionId, SessionState, TransportRole,
};
use lobbyforge_runtime::RuntimeExit;
use lobbyforge_session::SessionHooks;
use lobbyforge_transport::{HOST_CONNECTION, TransportEvent};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::orchestrator::Inner;

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Entry and exit actions for the lobby state machine.
///
/// Holds a `Weak` because the state machine lives inside `Inner`.
pub(crate) struct LobbyHooks {
    inner: Weak<Inner>,
}

impl LobbyHooks {
    pub(crate) fn new(inner: Weak<Inner>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SessionHooks for LobbyHooks {
    async fn on_exit(&self, state: SessionState, _next: SessionState) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if state == SessionState::Active {
            inner.stop_runtime().await;
        }
    }

    async fn on_enter(&self, state: SessionState, previous: SessionState) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match state {
            SessionState::Active => inner.ensure_runtime(),
            SessionState::Failed => {
                inner.cancel_operation();
                inner.spawn_rollback(previous);
                inner.release_resources().await;
            }
            SessionState::Idle => inner.release_resources().await,
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Task spawning
// ---------------------------------------------------------------------------

/// Starts the supervisor and the timeout ticker.
pub(crate) fn spawn_background(inner: &Arc<Inner>) {
    let events = inner.bus.subscribe();
    tokio::spawn(supervise(inner.clone(), events, inner.root.child_token()));
    tokio::spawn(tick(inner.clone(), inner.root.child_token()));
}

/// Ends the lobby when the runtime for `session_id` stops on its own.
///
/// Reads the runtime's exit reason directly rather than its bus events,
/// which a lagging subscriber may miss.
pub(crate) async fn watch_runtime(
    inner: Arc<Inner>,
    session_id: SessionId,
    mut exit: watch::Receiver<Option<RuntimeExit>>,
) {
    let reason = match exit.wait_for(Option::is_some).await {
        Ok(reason) => *reason,
        Err(_) => return,
    };
    if !inner.is_current(&session_id) {
        return;
    }
    match reason {
        Some(RuntimeExit::SessionRemoved) => {
            inner
                .end_session(ErrorKind::NotFound, "The session was closed.")
                .await;
        }
        Some(RuntimeExit::Kicked) => {
            inner
                .end_session(ErrorKind::NotFound, "You were removed from the session.")
                .await;
        }
        Some(RuntimeExit::SessionLost) => {
            inner
                .end_session(ErrorKind::Transient, "Lost contact with the session.")
                .await;
        }
        Some(RuntimeExit::Stopped) | None => {}
    }
}

/// Forwards one transport's events into the orchestrator, in order.
pub(crate) async fn pump_transport(
    inner: Arc<Inner>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => inner.on_transport_event(event).await,
                None => break,
            },
        }
    }
    tracing::debug!("transport pump stopped");
}

async fn supervise(
    inner: Arc<Inner>,
    mut events: EventSubscription,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => inner.observe(event).await,
                None => break,
            },
        }
    }
}

async fn tick(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut cadence =
        Cadence::new("timeout-check", inner.config.timeout_check_interval);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = cadence.wait() => {
                let before = inner.session.state();
                let moved = inner.session.tick().await;
                // A leave or remove that outlived its timeout is still
                // holding the operation slot.
                if moved == Some(SessionState::Idle)
                    && matches!(before, SessionState::Leaving | SessionState::Removing)
                {
                    inner.cancel_operation();
                }
                inner.transport.tick();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Event handling
// ---------------------------------------------------------------------------

impl Inner {
    fn transport_role(&self) -> Option<TransportRole> {
        self.link.lock().as_ref().map(|l| l.role)
    }

    fn is_current(&self, session_id: &SessionId) -> bool {
        self.directory.current_session().as_ref() == Some(session_id)
    }

    /// Keeps the snapshot cache and registry in step with the bus.
    async fn observe(&self, event: LobbyEvent) {
        match event {
            LobbyEvent::SessionUpdated(session) if self.is_current(&session.id) => {
                self.set_snapshot(session);
            }
            LobbyEvent::ParticipantLeft { participant, .. } => {
                self.registry.lock().unregister_participant(&participant.id);
            }
            _ => {}
        }
    }

    /// Terminal directory condition: `Active → Failed → Idle` at once.
    async fn end_session(&self, kind: ErrorKind, message: &str) {
        if self.session.state() != SessionState::Active {
            return;
        }
        // Nothing left to roll back remotely.
        self.directory.clear_current();
        if self.session.fail(kind, message).await {
            self.session.try_transition(SessionState::Idle).await;
        }
    }

    async fn on_transport_event(&self, event: TransportEvent) {
        self.transport.apply(&event);
        match event {
            TransportEvent::Connected { local } => {
                tracing::info!(connection = %local, "transport connected");
                self.bus.emit(LobbyEvent::TransportConnected { connection: local });
                if self.transport_role() == Some(TransportRole::Client) {
                    let hello = HandshakeMessage::Hello {
                        participant_id: self.local().clone(),
                    };
                    self.send_handshake(HOST_CONNECTION, &hello).await;
                }
            }
            TransportEvent::PeerConnected(connection) => {
                tracing::info!(%connection, "peer connected");
                self.bus.emit(LobbyEvent::PeerConnected { connection });
                self.guess_identity(connection);
            }
            TransportEvent::PeerDisconnected(connection) => {
                tracing::info!(%connection, "peer disconnected");
                self.bus.emit(LobbyEvent::PeerDisconnected { connection });
                self.registry.lock().unregister_connection(connection);
            }
            TransportEvent::Message { from, payload } => {
                self.on_message(from, &payload).await;
            }
            TransportEvent::Disconnected { reason } => {
                tracing::warn!(%reason, "transport disconnected");
                self.bus.emit(LobbyEvent::TransportDisconnected {
                    reason: reason.clone(),
                });
                self.on_transport_lost(&reason).await;
            }
            TransportEvent::Failed { reason } => {
                tracing::warn!(%reason, "transport failed");
                self.bus.emit(LobbyEvent::TransportFailed {
                    reason: reason.clone(),
                });
                self.on_transport_lost(&reason).await;
            }
        }
    }

    /// A dropped transport takes the whole lobby down. During create/join
    /// the flow itself notices; afterwards it's handled here.
    async fn on_transport_lost(&self, reason: &str) {
        if self.session.state() == SessionState::Active {
            self.session
                .fail(ErrorKind::Transient, format!("Connection lost ({reason})."))
                .await;
        }
    }

    /// Host only: pairs a new connection with the one participant that
    /// has no connection yet. With zero or several candidates the
    /// handshake decides.
    fn guess_identity(&self, connection: ConnectionId) {
        if self.transport_role() != Some(TransportRole::Host) {
            return;
        }
        let Some(session) = self.snapshot() else {
            return;
        };
        let mut registry = self.registry.lock();
        let unmapped = registry.unmapped_participants(&session, self.local());
        match unmapped.as_slice() {
            [only] => {
                if registry.register_speculative(only.clone(), connection) {
                    tracing::debug!(participant = %only, %connection, "speculative identity");
                }
            }
            candidates => {
                tracing::debug!(
                    %connection,
                    candidates = candidates.len(),
                    "identity left to handshake"
                );
            }
        }
    }

    async fn on_message(&self, from: ConnectionId, payload: &[u8]) {
        let message: HandshakeMessage = match self.codec.decode(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::trace!(%from, error = %e, "ignoring non-handshake payload");
                return;
            }
        };
        match (self.transport_role(), message) {
            (Some(TransportRole::Host), HandshakeMessage::Hello { participant_id }) => {
                let known = self
                    .snapshot()
                    .is_some_and(|s| s.contains(&participant_id));
                if !known {
                    tracing::debug!(
                        participant = %participant_id,
                        "hello from a participant not in the last snapshot"
                    );
                }
                self.registry
                    .lock()
                    .register_mapping(participant_id.clone(), from);
                tracing::info!(participant = %participant_id, connection = %from, "identity confirmed");
                let welcome = HandshakeMessage::Welcome {
                    participant_id: self.local().clone(),
                };
                self.send_handshake(from, &welcome).await;
            }
            (Some(TransportRole::Client), HandshakeMessage::Welcome { participant_id }) => {
                tracing::info!(host = %participant_id, "host identity confirmed");
                self.registry
                    .lock()
                    .register_mapping(participant_id, HOST_CONNECTION);
            }
            (role, message) => {
                tracing::debug!(?role, ?message, "unexpected handshake message");
            }
        }
    }

    async fn send_handshake(&self, to: ConnectionId, message: &HandshakeMessage) {
        let bytes = match self.codec.encode(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode handshake");
                return;
            }
        };
        if let Err(e) = self.driver.send(to, bytes).await {
            tracing::warn!(%to, error = %e, "failed to send handshake");
        }
    }
}
