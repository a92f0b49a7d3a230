//! The session (lobby flow) state machine.
//!
//! ```text
//! try_transition(target)
//!   ├─ rejected? (not in table, or another transition running) → false
//!   ├─ hooks.on_exit(from, target).await
//!   ├─ state = target, publish SessionStateChanged
//!   └─ hooks.on_enter(target, from).await
//! ```
//!
//! # Reentrancy
//!
//! A `transitioning` flag covers the whole sequence above. While it is
//! set every other transition is rejected, so a hook must never try to
//! transition the machine it is running for. The flag is released by a
//! drop guard, which means a transition whose future is dropped (its
//! operation was cancelled) doesn't wedge the machine.
//!
//! # Forced transitions
//!
//! [`force`](SessionStateMachine::force) ignores the table, skips hooks
//! and bumps an epoch counter. A transition that was in flight when the
//! epoch moved notices on its next step and gives up instead of
//! overwriting the forced state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lobbyforge_protocol::{ErrorKind, EventBus, LobbyEvent, SessionState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::SessionError;

const MIN_TIMEOUT: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Time limits for the transitional states and the failure grace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMachineConfig {
    /// `Creating` longer than this fails.
    pub create_timeout: Duration,
    /// `Joining` longer than this fails.
    pub join_timeout: Duration,
    /// `Leaving` longer than this goes straight to `Idle`.
    pub leave_timeout: Duration,
    /// `Removing` longer than this goes straight to `Idle`.
    pub remove_timeout: Duration,
    /// How long `Failed` lingers before recovering to `Idle`.
    pub failed_grace: Duration,
}

impl Default for SessionMachineConfig {
    fn default() -> Self {
        Self {
            create_timeout: Duration::from_secs(30),
            join_timeout: Duration::from_secs(30),
            leave_timeout: Duration::from_secs(15),
            remove_timeout: Duration::from_secs(15),
            failed_grace: Duration::from_secs(3),
        }
    }
}

impl SessionMachineConfig {
    pub fn validated(mut self) -> Self {
        for d in [
            &mut self.create_timeout,
            &mut self.join_timeout,
            &mut self.leave_timeout,
            &mut self.remove_timeout,
            &mut self.failed_grace,
        ] {
            *d = (*d).max(MIN_TIMEOUT);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Side effects attached to entering and leaving states.
///
/// Both methods default to doing nothing. They run inside the
/// transition, so the next transition waits for them to return.
#[async_trait]
pub trait SessionHooks: Send + Sync + 'static {
    /// Called before `state` is left for `next`.
    async fn on_exit(&self, _state: SessionState, _next: SessionState) {}

    /// Called after `state` has been entered from `previous` and the
    /// change event has been published.
    async fn on_enter(&self, _state: SessionState, _previous: SessionState) {}
}

/// Hooks that do nothing.
pub struct NoHooks;

impl SessionHooks for NoHooks {}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// Why the machine last entered `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

struct Inner {
    state: SessionState,
    entered_at: Instant,
    transitioning: bool,
    epoch: u64,
    last_failure: Option<SessionFailure>,
}

/// Clears the `transitioning` flag when a transition ends, however it
/// ends.
struct TransitionGuard<'a> {
    inner: &'a Mutex<Inner>,
    epoch: u64,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if inner.epoch == self.epoch {
            inner.transitioning = false;
        }
    }
}

/// The authoritative lobby flow state.
pub struct SessionStateMachine {
    config: SessionMachineConfig,
    bus: EventBus,
    hooks: Arc<dyn SessionHooks>,
    inner: Mutex<Inner>,
    watch_tx: watch::Sender<SessionState>,
}

impl SessionStateMachine {
    pub fn new(
        config: SessionMachineConfig,
        bus: EventBus,
        hooks: Arc<dyn SessionHooks>,
    ) -> Self {
        let (watch_tx, _) = watch::channel(SessionState::Idle);
        Self {
            config: config.validated(),
            bus,
            hooks,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                entered_at: Instant::now(),
                transitioning: false,
                epoch: 0,
                last_failure: None,
            }),
            watch_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn time_in_state(&self) -> Duration {
        self.inner.lock().entered_at.elapsed()
    }

    pub fn is_transitioning(&self) -> bool {
        self.inner.lock().transitioning
    }

    pub fn last_failure(&self) -> Option<SessionFailure> {
        self.inner.lock().last_failure.clone()
    }

    pub fn config(&self) -> &SessionMachineConfig {
        &self.config
    }

    /// A receiver that always holds the current state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.watch_tx.subscribe()
    }

    /// Attempts `self.state() → target`. Returns `false` (and publishes
    /// nothing) if the table forbids it or another transition is running.
    pub async fn try_transition(&self, target: SessionState) -> bool {
        self.transition(target).await.is_ok()
    }

    /// Like [`try_transition`](Self::try_transition) but says why.
    pub async fn transition(
        &self,
        target: SessionState,
    ) -> Result<(), SessionError> {
        let (from, epoch) = {
            let mut inner = self.inner.lock();
            if inner.transitioning {
                tracing::warn!(
                    state = %inner.state,
                    to = %target,
                    "rejected session transition: another one is running"
                );
                return Err(SessionError::TransitionInProgress);
            }
            let from = inner.state;
            if !from.can_transition_to(target) {
                tracing::warn!(%from, to = %target, "rejected session transition");
                return Err(SessionError::InvalidTransition { from, to: target });
            }
            inner.transitioning = true;
            (from, inner.epoch)
        };
        let _guard = TransitionGuard {
            inner: &self.inner,
            epoch,
        };

        self.hooks.on_exit(from, target).await;

        {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                tracing::debug!(%from, to = %target, "session transition superseded");
                return Err(SessionError::Superseded);
            }
            inner.state = target;
            inner.entered_at = Instant::now();
        }
        self.publish(from, target);

        self.hooks.on_enter(target, from).await;
        Ok(())
    }

    /// Moves to `Failed`, recording why. The failure is surfaced once as
    /// [`LobbyEvent::OperationFailed`]. Returns `false` if `Failed` isn't
    /// reachable from the current state.
    pub async fn fail(&self, kind: ErrorKind, message: impl Into<String>) -> bool {
        let message = message.into();
        if !self.try_transition(SessionState::Failed).await {
            tracing::debug!(%kind, %message, "failure not recorded");
            return false;
        }
        tracing::warn!(%kind, %message, "session failed");
        self.inner.lock().last_failure = Some(SessionFailure {
            kind,
            message: message.clone(),
        });
        self.bus.emit(LobbyEvent::OperationFailed { kind, message });
        true
    }

    /// Sets the state directly, ignoring the table and skipping hooks.
    /// Any in-flight transition is abandoned. Publishes a change event
    /// unless the state is unchanged.
    pub fn force(&self, target: SessionState) {
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            inner.epoch += 1;
            inner.transitioning = false;
            inner.state = target;
            inner.entered_at = Instant::now();
            from
        };
        if from != target {
            tracing::warn!(%from, to = %target, "forced session transition");
            self.publish(from, target);
        }
    }

    /// Enforces time-in-state limits. Call periodically.
    ///
    /// - `Creating`/`Joining` past their timeout → `Failed`
    /// - `Leaving`/`Removing` past their timeout → `Idle`
    /// - `Failed` past the grace period → `Idle`
    ///
    /// Returns the state a timeout moved the machine into, if any.
    pub async fn tick(&self) -> Option<SessionState> {
        let (state, elapsed) = {
            let inner = self.inner.lock();
            if inner.transitioning {
                return None;
            }
            (inner.state, inner.entered_at.elapsed())
        };

        let limit = match state {
            SessionState::Creating => self.config.create_timeout,
            SessionState::Joining => self.config.join_timeout,
            SessionState::Leaving => self.config.leave_timeout,
            SessionState::Removing => self.config.remove_timeout,
            SessionState::Failed => self.config.failed_grace,
            SessionState::Idle | SessionState::Active => return None,
        };
        if elapsed < limit {
            return None;
        }

        match state {
            SessionState::Creating | SessionState::Joining => {
                let message = format!("{state} timed out after {}s", limit.as_secs());
                self.fail(ErrorKind::Timeout, message)
                    .await
                    .then_some(SessionState::Failed)
            }
            SessionState::Failed => {
                tracing::info!("failure grace elapsed, recovering to Idle");
                self.try_transition(SessionState::Idle)
                    .await
                    .then_some(SessionState::Idle)
            }
            _ => {
                tracing::warn!(%state, ?elapsed, "timed out, continuing cleanup locally");
                self.try_transition(SessionState::Idle)
                    .await
                    .then_some(SessionState::Idle)
            }
        }
    }

    fn publish(&self, from: SessionState, to: SessionState) {
        tracing::info!(%from, %to, "session state changed");
        self.watch_tx.send_replace(to);
        self.bus.emit(LobbyEvent::SessionStateChanged { from, to });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobbyforge_protocol::EventSubscription;

    fn machine() -> (SessionStateMachine, EventSubscription) {
        let bus = EventBus::default();
        let sub = bus.subscribe();
        let m = SessionStateMachine::new(
            SessionMachineConfig::default(),
            bus,
            Arc::new(NoHooks),
        );
        (m, sub)
    }

    fn path_to(state: SessionState) -> Vec<SessionState> {
        use SessionState::*;
        match state {
            Idle => vec![],
            Creating => vec![Creating],
            Joining => vec![Joining],
            Active => vec![Creating, Active],
            Leaving => vec![Creating, Active, Leaving],
            Removing => vec![Creating, Active, Removing],
            Failed => vec![Creating, Failed],
        }
    }

    #[tokio::test]
    async fn test_try_transition_every_pair_matches_table() {
        for from in SessionState::ALL {
            for to in SessionState::ALL {
                let (m, mut sub) = machine();
                for s in path_to(from) {
                    assert!(m.try_transition(s).await);
                }
                sub.drain();

                let ok = m.try_transition(to).await;
                let events = sub.drain();

                assert_eq!(ok, from.can_transition_to(to), "{from} -> {to}");
                if ok {
                    assert_eq!(
                        events,
                        vec![LobbyEvent::SessionStateChanged { from, to }]
                    );
                } else {
                    assert!(events.is_empty(), "{from} -> {to}: {events:?}");
                    assert_eq!(m.state(), from);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_transition_invalid_reports_reason() {
        let (m, _sub) = machine();
        assert_eq!(
            m.transition(SessionState::Active).await,
            Err(SessionError::InvalidTransition {
                from: SessionState::Idle,
                to: SessionState::Active,
            })
        );
    }

    #[tokio::test]
    async fn test_fail_records_reason_and_emits_once() {
        let (m, mut sub) = machine();
        m.try_transition(SessionState::Creating).await;
        sub.drain();

        assert!(m.fail(ErrorKind::Transient, "directory down").await);
        assert!(!m.fail(ErrorKind::Transient, "again").await);

        let events = sub.drain();
        assert_eq!(
            events,
            vec![
                LobbyEvent::SessionStateChanged {
                    from: SessionState::Creating,
                    to: SessionState::Failed,
                },
                LobbyEvent::OperationFailed {
                    kind: ErrorKind::Transient,
                    message: "directory down".into(),
                },
            ]
        );
        assert_eq!(
            m.last_failure().map(|f| f.kind),
            Some(ErrorKind::Transient)
        );
    }

    #[tokio::test]
    async fn test_fail_from_idle_is_rejected() {
        let (m, mut sub) = machine();
        assert!(!m.fail(ErrorKind::Timeout, "nope").await);
        assert!(sub.drain().is_empty());
    }

    #[tokio::test]
    async fn test_force_from_any_state_lands_on_idle() {
        for from in SessionState::ALL {
            let (m, _sub) = machine();
            for s in path_to(from) {
                m.try_transition(s).await;
            }
            m.force(SessionState::Idle);
            assert_eq!(m.state(), SessionState::Idle);
            assert!(!m.is_transitioning());
        }
    }

    #[test]
    fn test_config_validated_floors_durations() {
        let c = SessionMachineConfig {
            create_timeout: Duration::ZERO,
            join_timeout: Duration::ZERO,
            leave_timeout: Duration::ZERO,
            remove_timeout: Duration::ZERO,
            failed_grace: Duration::ZERO,
        }
        .validated();
        assert_eq!(c.failed_grace, MIN_TIMEOUT);
        assert_eq!(c.create_timeout, MIN_TIMEOUT);
    }
}
