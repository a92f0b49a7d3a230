//! The orchestrated flows and the teardown they share.
//!
//! Host flow:
//!   1. `Idle → Creating`
//!   2. Directory create
//!   3. Relay allocation, join code published with `NetworkStatus=connecting`
//!   4. Transport started as host, wait for `Connected`
//!   5. `NetworkStatus=connected`, `Creating → Active` (runtime starts on entry)
//!
//! Join flow:
//!   1. `Idle → Joining`
//!   2. Directory join, runtime started so polls arrive
//!   3. Wait for a snapshot carrying `RelayJoinCode`
//!   4. Relay join, transport started as client, wait for `Connected`
//!   5. `Joining → Active`
//!
//! A failing step returns an error; the caller moves the lobby to
//! `Failed`, whose entry hook rolls back whatever was set up.

use std::collections::BTreeMap;
use std::sync::Arc;

use lobbyforge_protocol::{
    ErrorKind, LobbyEvent, NetworkStatus, ParticipantId, ParticipantPatch,
    Session, SessionId, SessionPatch, SessionPhase, SessionState,
    TransportConfig, TransportRole, TransportState, metadata,
    participant_data,
};
use lobbyforge_runtime::SessionRuntime;
use tokio::sync::{mpsc, watch};

use crate::LobbyError;
use crate::orchestrator::{Inner, TransportLink};
use crate::tasks;

impl Inner {
    // -----------------------------------------------------------------------
    // Exclusive flows
    // -----------------------------------------------------------------------

    pub(crate) async fn host_flow(
        self: &Arc<Self>,
        name: &str,
        max_participants: u32,
        mut fields: BTreeMap<String, String>,
    ) -> Result<Session, LobbyError> {
        self.session.transition(SessionState::Creating).await?;

        fields
            .entry(metadata::PHASE.to_string())
            .or_insert_with(|| SessionPhase::Waiting.as_str().to_string());
        let session = self
            .directory
            .create_session(name, max_participants, fields)
            .await?;
        let session_id = session.id.clone();
        self.set_snapshot(session.clone());
        self.bus.emit(LobbyEvent::SessionCreated(session));

        // The host itself doesn't take a relay slot.
        let peers = max_participants.saturating_sub(1).max(1);
        let (config, join_code) = self.relay.setup_host_relay(peers).await?;
        let session = self
            .directory
            .update_session(
                &session_id,
                SessionPatch::new()
                    .set(metadata::RELAY_JOIN_CODE, join_code.as_str())
                    .set(metadata::NETWORK_STATUS, NetworkStatus::Connecting.as_str()),
            )
            .await?;
        self.publish_snapshot(session);
        tracing::info!(%session_id, %join_code, "relay join code published");

        self.start_transport(config).await?;
        self.wait_for_transport().await?;

        let session = self
            .directory
            .update_session(
                &session_id,
                SessionPatch::new()
                    .set(metadata::NETWORK_STATUS, NetworkStatus::Connected.as_str()),
            )
            .await?;
        self.publish_snapshot(session.clone());

        self.require_connected()?;
        self.session.transition(SessionState::Active).await?;
        tracing::info!(%session_id, code = %session.join_code, "hosting session");
        Ok(session)
    }

    pub(crate) async fn join_flow(
        self: &Arc<Self>,
        code: &str,
        password: &str,
    ) -> Result<Session, LobbyError> {
        self.session.transition(SessionState::Joining).await?;

        let session = self.directory.join_session(code, password).await?;
        let session_id = session.id.clone();
        self.set_snapshot(session.clone());
        self.bus.emit(LobbyEvent::SessionJoined(session.clone()));

        let snapshots = self.start_runtime(session);
        let relay_code = wait_for_relay_code(snapshots).await?;

        let config = self.relay.join_as_client(&relay_code).await?;
        self.start_transport(config).await?;
        self.wait_for_transport().await?;

        self.require_connected()?;
        self.session.transition(SessionState::Active).await?;
        tracing::info!(%session_id, "joined session");
        self.snapshot().ok_or(LobbyError::SessionEnded)
    }

    pub(crate) async fn leave_flow(&self) -> Result<(), LobbyError> {
        let session_id = self.require_active("leave")?;
        self.session.transition(SessionState::Leaving).await?;

        let local = self.local().clone();
        match self.directory.leave_session(&session_id, &local).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(%session_id, "session already gone while leaving");
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(%session_id, "left session");
        self.bus.emit(LobbyEvent::SessionLeft { session_id });
        self.session.transition(SessionState::Idle).await?;
        Ok(())
    }

    pub(crate) async fn remove_flow(&self) -> Result<(), LobbyError> {
        let session_id = self.require_active("remove the session")?;
        self.require_host("remove the session")?;
        self.session.transition(SessionState::Removing).await?;

        match self.directory.remove_session(&session_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(%session_id, "session already gone while removing");
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(%session_id, "removed session");
        self.bus.emit(LobbyEvent::SessionRemoved { session_id });
        self.session.transition(SessionState::Idle).await?;
        Ok(())
    }

    /// Moves the lobby to `Failed` after `operation` failed, unless
    /// something else (a reset, a timeout, shutdown) already moved it on.
    pub(crate) async fn fail_flow(
        &self,
        operation: &'static str,
        flow_state: SessionState,
        error: &LobbyError,
    ) {
        if self.root.is_cancelled() {
            tracing::debug!(operation, "operation abandoned by shutdown");
            return;
        }
        let kind = error.kind();
        tracing::warn!(operation, %kind, error = %error, "operation failed");
        if kind == ErrorKind::NotFound {
            self.bus.emit(LobbyEvent::SessionNotFound {
                session_id: self.directory.current_session(),
            });
        }
        if self.session.state() == flow_state {
            self.session.fail(kind, error.summary()).await;
        }
    }

    // -----------------------------------------------------------------------
    // Pass-through commands
    // -----------------------------------------------------------------------

    pub(crate) async fn kick(&self, participant: &ParticipantId) -> Result<(), LobbyError> {
        let session_id = self.require_active("kick")?;
        self.require_host("kick participants")?;

        self.directory
            .kick_participant(&session_id, participant)
            .await?;

        let mapping = self.registry.lock().unregister_participant(participant);
        if let Some(mapping) = mapping {
            if let Err(e) = self.driver.disconnect_peer(mapping.connection).await {
                tracing::debug!(connection = %mapping.connection, error = %e, "kicked peer already gone");
            }
        }
        tracing::info!(%session_id, %participant, "participant kicked");
        Ok(())
    }

    pub(crate) async fn set_ready(&self, ready: bool) -> Result<Session, LobbyError> {
        let session_id = self.require_active("change ready state")?;
        let local = self.local().clone();
        let value = if ready { "true" } else { "false" };
        let session = self
            .directory
            .update_participant(
                &session_id,
                &local,
                ParticipantPatch::new().set(participant_data::IS_READY, value),
            )
            .await?;
        self.publish_snapshot(session.clone());
        Ok(session)
    }

    pub(crate) async fn host_update(
        &self,
        action: &'static str,
        patch: SessionPatch,
    ) -> Result<Session, LobbyError> {
        let session_id = self.require_active(action)?;
        self.require_host(action)?;
        let session = self.directory.update_session(&session_id, patch).await?;
        self.publish_snapshot(session.clone());
        Ok(session)
    }

    fn require_active(
        &self,
        action: &'static str,
    ) -> Result<SessionId, LobbyError> {
        let state = self.session.state();
        if state != SessionState::Active {
            return Err(LobbyError::WrongState { action, state });
        }
        self.directory
            .current_session()
            .ok_or(LobbyError::WrongState { action, state })
    }

    fn require_host(&self, action: &'static str) -> Result<(), LobbyError> {
        if self.is_host() {
            Ok(())
        } else {
            Err(LobbyError::NotHost(action))
        }
    }

    fn require_connected(&self) -> Result<(), LobbyError> {
        match self.transport.state() {
            TransportState::Connected => Ok(()),
            other => Err(LobbyError::NotConnected(other)),
        }
    }

    // -----------------------------------------------------------------------
    // Runtime
    // -----------------------------------------------------------------------

    /// Starts a runtime for `session`, replacing any previous one, and
    /// returns its snapshot feed.
    pub(crate) fn start_runtime(
        self: &Arc<Self>,
        session: Session,
    ) -> watch::Receiver<Session> {
        let session_id = session.id.clone();
        let handle = SessionRuntime::start(
            self.config.runtime.clone(),
            self.directory.clone(),
            session,
            self.bus.clone(),
            self.root.child_token(),
        );
        tokio::spawn(tasks::watch_runtime(
            self.clone(),
            session_id,
            handle.exit_watch(),
        ));
        let snapshots = handle.snapshots();
        let previous = self.runtime.lock().replace(handle);
        drop(previous);
        snapshots
    }

    /// Starts a runtime unless one is already running.
    pub(crate) fn ensure_runtime(self: &Arc<Self>) {
        let running = self
            .runtime
            .lock()
            .as_ref()
            .is_some_and(|h| h.is_running());
        if running {
            return;
        }
        if let Some(session) = self.snapshot() {
            self.start_runtime(session);
        }
    }

    pub(crate) async fn stop_runtime(&self) {
        let handle = self.runtime.lock().take();
        if let Some(handle) = handle {
            let exit = handle.stop().await;
            tracing::debug!(?exit, "runtime stopped");
        }
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    async fn start_transport(
        self: &Arc<Self>,
        config: TransportConfig,
    ) -> Result<(), LobbyError> {
        if self.transport.state() != TransportState::Idle {
            tracing::warn!(state = %self.transport.state(), "stale transport, tearing down first");
            self.teardown_transport().await;
        }
        if !self.transport.try_transition(TransportState::Connecting) {
            return Err(LobbyError::NotConnected(self.transport.state()));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pump = self.root.child_token();
        let role = config.role;
        *self.link.lock() = Some(TransportLink {
            role,
            pump: pump.clone(),
        });
        tokio::spawn(tasks::pump_transport(self.clone(), events_rx, pump));

        let started = match role {
            TransportRole::Host => self.driver.start_host(config, events_tx).await,
            TransportRole::Client => self.driver.start_client(config, events_tx).await,
        };
        if let Err(e) = started {
            tracing::warn!(?role, error = %e, "transport failed to start");
            self.transport.try_transition(TransportState::Failed);
            return Err(e.into());
        }
        Ok(())
    }

    /// Waits until the transport leaves `Connecting`.
    async fn wait_for_transport(&self) -> Result<(), LobbyError> {
        let mut states = self.transport.subscribe();
        let state = states
            .wait_for(|s| *s != TransportState::Connecting)
            .await
            .map(|s| *s)
            .map_err(|_| LobbyError::Cancelled)?;
        match state {
            TransportState::Connected => Ok(()),
            other => Err(LobbyError::NotConnected(other)),
        }
    }

    /// Stops the pump, shuts the driver down and walks the transport
    /// machine back to `Idle`. Idempotent.
    pub(crate) async fn teardown_transport(&self) {
        let link = self.link.lock().take();
        let state = self.transport.state();
        if link.is_none() && state == TransportState::Idle {
            return;
        }
        if let Some(link) = &link {
            link.pump.cancel();
        }
        if matches!(state, TransportState::Connecting | TransportState::Connected) {
            self.transport.try_transition(TransportState::Disconnecting);
        }
        self.driver.shutdown().await;

        if self.transport.state() == TransportState::Disconnecting {
            self.transport.try_transition(TransportState::Disconnected);
        }
        if matches!(
            self.transport.state(),
            TransportState::Disconnected | TransportState::Failed
        ) {
            self.transport.try_transition(TransportState::Idle);
        }
        tracing::info!("transport torn down");
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Local cleanup on entering `Idle` or `Failed`.
    pub(crate) async fn release_resources(&self) {
        self.stop_runtime().await;
        self.teardown_transport().await;
        self.registry.lock().clear();
        self.relay.release();
        self.directory.clear_current();
        self.clear_snapshot();
    }

    /// Best-effort undo of the directory side after a failure: the host
    /// marks the session failed and deletes it, anyone else leaves it.
    /// Runs detached so a hung directory can't stall the transition.
    pub(crate) fn spawn_rollback(&self, previous: SessionState) {
        let Some(session_id) = self.directory.current_session() else {
            return;
        };
        let host = self.is_host();
        let remove = host
            && matches!(
                previous,
                SessionState::Creating | SessionState::Active | SessionState::Removing
            );
        let directory = self.directory.clone();
        let local = self.local().clone();
        let limit = self.config.session.leave_timeout;

        tokio::spawn(async move {
            let rollback = async {
                if host {
                    let patch = SessionPatch::new()
                        .set(metadata::NETWORK_STATUS, NetworkStatus::Failed.as_str());
                    let _ = directory.update_session(&session_id, patch).await;
                }
                if remove {
                    directory.remove_session(&session_id).await
                } else {
                    directory.leave_session(&session_id, &local).await
                }
            };
            match tokio::time::timeout(limit, rollback).await {
                Ok(Ok(())) => tracing::info!(%session_id, remove, "directory rolled back"),
                Ok(Err(e)) => tracing::debug!(%session_id, error = %e, "directory rollback failed"),
                Err(_) => tracing::debug!(%session_id, "directory rollback timed out"),
            }
        });
    }

    /// Both machines go to `Idle` before anything is awaited, so the
    /// cancelled flow can't see its own state and fail it on the way out.
    pub(crate) async fn emergency_reset(&self) {
        tracing::warn!(
            session = %self.session.state(),
            transport = %self.transport.state(),
            "emergency reset"
        );
        self.session.force(SessionState::Idle);
        self.transport.force(TransportState::Idle);
        self.cancel_operation();
        self.registry.lock().clear();
        self.relay.release();
        self.directory.clear_current();
        self.clear_snapshot();

        self.stop_runtime().await;
        self.teardown_transport().await;
    }
}

/// Waits for the host to publish its relay code. Fails if the host
/// reports a network failure or the runtime stops first.
async fn wait_for_relay_code(
    mut snapshots: watch::Receiver<Session>,
) -> Result<String, LobbyError> {
    let has_code = |s: &Session| s.relay_join_code().is_some_and(|c| !c.is_empty());
    if !has_code(&*snapshots.borrow()) {
        tracing::info!("waiting for the host to publish a relay code");
    }
    let snapshot = snapshots
        .wait_for(|s| has_code(s) || s.network_status() == Some(NetworkStatus::Failed))
        .await
        .map(|s| s.clone())
        .map_err(|_| LobbyError::SessionEnded)?;

    if snapshot.network_status() == Some(NetworkStatus::Failed) {
        return Err(LobbyError::SessionEnded);
    }
    snapshot
        .relay_join_code()
        .map(str::to_string)
        .ok_or(LobbyError::SessionEnded)
}
