//! The `Orchestrator`: the one object UI code talks to.
//!
//! It owns every other component and sequences them into the two
//! user-visible flows, host and join. The pieces it wires together:
//!
//! ```text
//!   commands ──→ Orchestrator ──→ SessionStateMachine ──hooks──┐
//!                  │    │                                      │
//!                  │    ├──→ DirectoryClient ←── SessionRuntime (poll / heartbeat)
//!                  │    └──→ RelayCoordinator                  │
//!                  │                                           ▼
//!                  └──→ TransportDriver ──events──→ pump ──→ TransportStateMachine
//!                                                    │         IdentityRegistry
//!                                                    ▼
//!                                                 EventBus ──→ subscribers
//! ```
//!
//! Create, join, leave and remove are *exclusive*: one at a time, and a
//! second caller gets [`LobbyError::Busy`] instead of waiting. Each
//! exclusive operation runs under its own cancellation token, a child of
//! the orchestrator's root token, so [`Orchestrator::emergency_reset`]
//! and [`Orchestrator::shutdown`] can abandon it at any await point.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use lobbyforge_directory::{DirectoryClient, DirectoryService};
use lobbyforge_protocol::{
    ConnectionId, EventBus, EventSubscription, JsonCodec, LobbyEvent,
    ParticipantId, Session, SessionPatch, SessionPhase, SessionState,
    TransportRole, TransportState, metadata,
};
use lobbyforge_relay::{RelayCoordinator, RelayService};
use lobbyforge_runtime::RuntimeHandle;
use lobbyforge_session::{
    IdentityMapping, IdentityRegistry, SessionFailure, SessionStateMachine,
};
use lobbyforge_transport::{TransportDriver, TransportStateMachine};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::tasks::{self, LobbyHooks};
use crate::{LobbyConfig, LobbyError};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// The transport currently started, if any.
pub(crate) struct TransportLink {
    pub(crate) role: TransportRole,
    /// Stops the task pumping this transport's events.
    pub(crate) pump: CancellationToken,
}

/// State shared between the public handle, the state machine hooks and
/// the background tasks.
pub(crate) struct Inner {
    pub(crate) config: LobbyConfig,
    pub(crate) directory: Arc<DirectoryClient>,
    pub(crate) relay: RelayCoordinator,
    pub(crate) driver: Arc<dyn TransportDriver>,
    pub(crate) registry: Mutex<IdentityRegistry>,
    pub(crate) session: SessionStateMachine,
    pub(crate) transport: TransportStateMachine,
    pub(crate) bus: EventBus,
    pub(crate) codec: JsonCodec,
    /// Cancelled by shutdown; parent of every other token.
    pub(crate) root: CancellationToken,
    busy: AtomicBool,
    operation: Mutex<Option<CancellationToken>>,
    pub(crate) link: Mutex<Option<TransportLink>>,
    pub(crate) runtime: Mutex<Option<RuntimeHandle>>,
    snapshot: RwLock<Option<Session>>,
}

impl Inner {
    pub(crate) fn local(&self) -> &ParticipantId {
        self.directory.local_participant()
    }

    pub(crate) fn snapshot(&self) -> Option<Session> {
        self.snapshot.read().clone()
    }

    pub(crate) fn set_snapshot(&self, session: Session) {
        *self.snapshot.write() = Some(session);
    }

    pub(crate) fn clear_snapshot(&self) {
        self.snapshot.write().take();
    }

    /// Stores a snapshot produced by a local command and tells
    /// subscribers about it.
    pub(crate) fn publish_snapshot(&self, session: Session) {
        self.set_snapshot(session.clone());
        self.bus.emit(LobbyEvent::SessionUpdated(session));
    }

    pub(crate) fn is_host(&self) -> bool {
        self.snapshot
            .read()
            .as_ref()
            .is_some_and(|s| s.is_host(self.local()))
    }

    /// Cancels the exclusive operation in flight, if any.
    pub(crate) fn cancel_operation(&self) {
        if let Some(token) = self.operation.lock().as_ref() {
            token.cancel();
        }
    }

    fn begin(&self, operation: &'static str) -> Result<OperationGuard<'_>, LobbyError> {
        if self.root.is_cancelled() {
            return Err(LobbyError::Cancelled);
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(operation, "rejected: another operation is in progress");
            return Err(LobbyError::Busy);
        }
        let token = self.root.child_token();
        *self.operation.lock() = Some(token.clone());
        tracing::debug!(operation, "operation started");
        Ok(OperationGuard { inner: self, token })
    }
}

/// Drop guard that releases the single-flight slot when an exclusive
/// operation ends.
///
/// This ensures the slot is freed even if the caller drops the
/// operation's future half way through.
struct OperationGuard<'a> {
    inner: &'a Inner,
    token: CancellationToken,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.inner.operation.lock().take();
        self.inner.busy.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring an [`Orchestrator`].
///
/// # Example
///
/// ```rust,ignore
/// use lobbyforge::prelude::*;
///
/// let lobby = Orchestrator::builder()
///     .local_participant(ParticipantId::new("player-1"))
///     .profile(participant_data::DISPLAY_NAME, "Ada")
///     .directory(my_directory)
///     .relay(my_relay)
///     .transport(my_transport)
///     .build()?;
/// ```
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: LobbyConfig,
    local: Option<ParticipantId>,
    profile: BTreeMap<String, String>,
    directory: Option<Arc<dyn DirectoryService>>,
    relay: Option<Arc<dyn RelayService>>,
    driver: Option<Arc<dyn TransportDriver>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: LobbyConfig) -> Self {
        self.config = config;
        self
    }

    /// The directory identity this process acts as.
    pub fn local_participant(mut self, id: ParticipantId) -> Self {
        self.local = Some(id);
        self
    }

    /// A value for the local participant's data bag, published on
    /// create/join.
    pub fn profile(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.profile.insert(key.into(), value.into());
        self
    }

    pub fn directory(mut self, service: Arc<dyn DirectoryService>) -> Self {
        self.directory = Some(service);
        self
    }

    pub fn relay(mut self, service: Arc<dyn RelayService>) -> Self {
        self.relay = Some(service);
        self
    }

    pub fn transport(mut self, driver: Arc<dyn TransportDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Builds the orchestrator and starts its background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<Orchestrator, LobbyError> {
        let local = self
            .local
            .ok_or_else(|| LobbyError::Config("local participant is required".into()))?;
        let directory = self
            .directory
            .ok_or_else(|| LobbyError::Config("directory service is required".into()))?;
        let relay = self
            .relay
            .ok_or_else(|| LobbyError::Config("relay service is required".into()))?;
        let driver = self
            .driver
            .ok_or_else(|| LobbyError::Config("transport driver is required".into()))?;

        let config = self.config.validated();
        let bus = EventBus::new(config.event_capacity);
        let client = DirectoryClient::new(directory, local.clone());
        for (key, value) in self.profile {
            client.set_profile_value(key, value);
        }

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            session: SessionStateMachine::new(
                config.session.clone(),
                bus.clone(),
                Arc::new(LobbyHooks::new(weak.clone())),
            ),
            transport: TransportStateMachine::new(config.transport.clone(), bus.clone()),
            registry: Mutex::new(IdentityRegistry::with_events(bus.clone())),
            directory: Arc::new(client),
            relay: RelayCoordinator::new(relay),
            driver,
            bus,
            codec: JsonCodec,
            root: CancellationToken::new(),
            busy: AtomicBool::new(false),
            operation: Mutex::new(None),
            link: Mutex::new(None),
            runtime: Mutex::new(None),
            snapshot: RwLock::new(None),
            config,
        });
        tasks::spawn_background(&inner);

        tracing::info!(participant = %local, "orchestrator ready");
        Ok(Orchestrator { inner })
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Coordinates one local player's lobby: hosting or joining a session,
/// keeping it alive, and connecting the transport.
///
/// Dropping the orchestrator cancels its background tasks. Call
/// [`shutdown`](Self::shutdown) first for an orderly teardown.
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Creates a new builder.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    // -- Exclusive flows ---------------------------------------------------

    /// Creates a session hosted by the local player, sets up the relay
    /// and starts the transport as host.
    ///
    /// Resolves once the session is `Active`. `metadata` may carry a
    /// password, game mode, map name and so on.
    pub async fn create_session(
        &self,
        name: &str,
        max_participants: u32,
        metadata: BTreeMap<String, String>,
    ) -> Result<Session, LobbyError> {
        self.exclusive(
            "create",
            SessionState::Creating,
            self.inner.host_flow(name, max_participants, metadata),
        )
        .await
    }

    /// Joins the session with `code`, waits for the host to publish its
    /// relay code, then connects the transport as a client.
    pub async fn join_session(
        &self,
        code: &str,
        password: &str,
    ) -> Result<Session, LobbyError> {
        self.exclusive(
            "join",
            SessionState::Joining,
            self.inner.join_flow(code, password),
        )
        .await
    }

    /// Leaves the active session.
    pub async fn leave_session(&self) -> Result<(), LobbyError> {
        self.exclusive("leave", SessionState::Leaving, self.inner.leave_flow())
            .await
    }

    /// Deletes the active session. Host only.
    pub async fn remove_session(&self) -> Result<(), LobbyError> {
        self.exclusive("remove", SessionState::Removing, self.inner.remove_flow())
            .await
    }

    /// Runs `flow` as the single in-flight operation. If it fails while
    /// the lobby is still in `flow_state`, the lobby moves to `Failed`.
    async fn exclusive<T>(
        &self,
        operation: &'static str,
        flow_state: SessionState,
        flow: impl Future<Output = Result<T, LobbyError>>,
    ) -> Result<T, LobbyError> {
        let guard = self.inner.begin(operation)?;
        let result = tokio::select! {
            biased;
            _ = guard.token.cancelled() => {
                tracing::info!(operation, "operation cancelled");
                Err(LobbyError::Cancelled)
            }
            result = flow => result,
        };
        if let Err(error) = &result {
            self.inner.fail_flow(operation, flow_state, error).await;
        }
        drop(guard);
        result
    }

    // -- Pass-through commands ---------------------------------------------

    /// Removes another participant from the session and drops their
    /// transport connection. Host only.
    pub async fn kick_participant(
        &self,
        participant: &ParticipantId,
    ) -> Result<(), LobbyError> {
        self.inner.kick(participant).await
    }

    /// Publishes the local player's ready flag.
    pub async fn set_ready(&self, ready: bool) -> Result<Session, LobbyError> {
        self.inner.set_ready(ready).await
    }

    pub async fn update_session_name(
        &self,
        name: &str,
    ) -> Result<Session, LobbyError> {
        self.inner
            .host_update("rename the session", SessionPatch::new().name(name))
            .await
    }

    pub async fn update_max_participants(
        &self,
        max: u32,
    ) -> Result<Session, LobbyError> {
        self.inner
            .host_update(
                "change the participant limit",
                SessionPatch::new().max_participants(max),
            )
            .await
    }

    /// Sets the join password. An empty string removes it.
    pub async fn update_password(
        &self,
        password: &str,
    ) -> Result<Session, LobbyError> {
        let patch = if password.is_empty() {
            SessionPatch::new().remove(metadata::PASSWORD)
        } else {
            SessionPatch::new().set(metadata::PASSWORD, password)
        };
        self.inner.host_update("change the password", patch).await
    }

    /// Advertises a new game phase.
    pub async fn set_phase(
        &self,
        phase: SessionPhase,
    ) -> Result<Session, LobbyError> {
        self.inner
            .host_update(
                "change the phase",
                SessionPatch::new().set(metadata::PHASE, phase.as_str()),
            )
            .await
    }

    /// Applies an arbitrary metadata patch. Host only.
    pub async fn update_metadata(
        &self,
        patch: SessionPatch,
    ) -> Result<Session, LobbyError> {
        self.inner.host_update("update session metadata", patch).await
    }

    // -- Recovery ------------------------------------------------------------

    /// Abandons whatever is in progress and returns everything to `Idle`,
    /// bypassing the transition tables.
    ///
    /// The only sanctioned way out of a stuck state. No directory calls
    /// are made; a hosted session left behind expires on its own.
    pub async fn emergency_reset(&self) {
        self.inner.emergency_reset().await;
    }

    /// Cancels everything, tears down and stops the background tasks.
    /// Later commands fail with [`LobbyError::Cancelled`].
    pub async fn shutdown(&self) {
        tracing::info!("orchestrator shutting down");
        self.inner.root.cancel();
        self.inner.emergency_reset().await;
    }

    // -- Observation ---------------------------------------------------------

    /// Subscribes to every [`LobbyEvent`](lobbyforge_protocol::LobbyEvent).
    pub fn subscribe(&self) -> EventSubscription {
        self.inner.bus.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.state()
    }

    pub fn transport_state(&self) -> TransportState {
        self.inner.transport.state()
    }

    /// A receiver that always holds the current lobby state.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.session.subscribe()
    }

    /// A receiver that always holds the current transport state.
    pub fn watch_transport(&self) -> watch::Receiver<TransportState> {
        self.inner.transport.subscribe()
    }

    /// The latest known snapshot of the current session.
    pub fn current_session(&self) -> Option<Session> {
        self.inner.snapshot()
    }

    pub fn local_participant(&self) -> &ParticipantId {
        self.inner.local()
    }

    pub fn is_host(&self) -> bool {
        self.inner.is_host()
    }

    /// `true` while an exclusive operation is running.
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    pub fn is_runtime_running(&self) -> bool {
        self.inner
            .runtime
            .lock()
            .as_ref()
            .is_some_and(RuntimeHandle::is_running)
    }

    /// Why the lobby last entered `Failed`.
    pub fn last_failure(&self) -> Option<SessionFailure> {
        self.inner.session.last_failure()
    }

    pub fn connection_for(&self, participant: &ParticipantId) -> Option<ConnectionId> {
        self.inner.registry.lock().try_resolve_connection(participant)
    }

    pub fn participant_for(&self, connection: ConnectionId) -> Option<ParticipantId> {
        self.inner.registry.lock().try_resolve_participant(connection)
    }

    pub fn identity_mappings(&self) -> Vec<IdentityMapping> {
        self.inner.registry.lock().mappings().cloned().collect()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.inner.root.cancel();
    }
}
