//! The transport state machine.

use std::time::Duration;

use lobbyforge_protocol::{EventBus, LobbyEvent, TransportState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::TransportEvent;

const MIN_TIMEOUT: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// TransportMachineConfig
// ---------------------------------------------------------------------------

/// How long the transitional states may last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportMachineConfig {
    /// `Connecting` longer than this becomes `Failed`.
    pub connect_timeout: Duration,
    /// `Disconnecting` longer than this becomes `Disconnected`.
    pub disconnect_timeout: Duration,
}

impl Default for TransportMachineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

impl TransportMachineConfig {
    pub fn validated(mut self) -> Self {
        self.connect_timeout = self.connect_timeout.max(MIN_TIMEOUT);
        self.disconnect_timeout = self.disconnect_timeout.max(MIN_TIMEOUT);
        self
    }
}

// ---------------------------------------------------------------------------
// TransportStateMachine
// ---------------------------------------------------------------------------

struct Inner {
    state: TransportState,
    entered_at: Instant,
}

/// Tracks the network connection's lifecycle.
///
/// Every accepted transition publishes exactly one
/// [`LobbyEvent::TransportStateChanged`] and updates the watch channel
/// returned by [`subscribe`](Self::subscribe). Rejected transitions
/// return `false` and publish nothing.
///
/// The machine has no hooks: whoever owns the driver reacts to state
/// changes. Transitions are serialized by an internal lock.
pub struct TransportStateMachine {
    config: TransportMachineConfig,
    bus: EventBus,
    inner: Mutex<Inner>,
    watch_tx: watch::Sender<TransportState>,
}

impl TransportStateMachine {
    pub fn new(config: TransportMachineConfig, bus: EventBus) -> Self {
        let (watch_tx, _) = watch::channel(TransportState::Idle);
        Self {
            config: config.validated(),
            bus,
            inner: Mutex::new(Inner {
                state: TransportState::Idle,
                entered_at: Instant::now(),
            }),
            watch_tx,
        }
    }

    pub fn state(&self) -> TransportState {
        self.inner.lock().state
    }

    pub fn time_in_state(&self) -> Duration {
        self.inner.lock().entered_at.elapsed()
    }

    /// A receiver that always holds the current state.
    pub fn subscribe(&self) -> watch::Receiver<TransportState> {
        self.watch_tx.subscribe()
    }

    /// Moves to `target` if the table allows it.
    pub fn try_transition(&self, target: TransportState) -> bool {
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            if !from.can_transition_to(target) {
                tracing::warn!(%from, to = %target, "rejected transport transition");
                return false;
            }
            inner.state = target;
            inner.entered_at = Instant::now();
            from
        };
        self.publish(from, target);
        true
    }

    /// Sets the state without consulting the table. Used by emergency
    /// reset only. Publishes a change event unless already there.
    pub fn force(&self, target: TransportState) {
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            inner.state = target;
            inner.entered_at = Instant::now();
            from
        };
        if from != target {
            tracing::warn!(%from, to = %target, "forced transport transition");
            self.publish(from, target);
        }
    }

    /// Applies a driver callback. Returns `true` if it changed state.
    ///
    /// Peer and message events don't affect the local connection and
    /// are ignored here.
    pub fn apply(&self, event: &TransportEvent) -> bool {
        match event {
            TransportEvent::Connected { .. } => {
                self.try_transition(TransportState::Connected)
            }
            TransportEvent::Disconnected { .. } => {
                self.try_transition(TransportState::Disconnected)
            }
            TransportEvent::Failed { .. } => {
                self.try_transition(TransportState::Failed)
            }
            TransportEvent::PeerConnected(_)
            | TransportEvent::PeerDisconnected(_)
            | TransportEvent::Message { .. } => false,
        }
    }

    /// Enforces the time-in-state limits. Call periodically.
    ///
    /// Returns the state a timeout moved the machine into, if any.
    pub fn tick(&self) -> Option<TransportState> {
        let (state, elapsed) = {
            let inner = self.inner.lock();
            (inner.state, inner.entered_at.elapsed())
        };
        let target = match state {
            TransportState::Connecting
                if elapsed >= self.config.connect_timeout =>
            {
                TransportState::Failed
            }
            TransportState::Disconnecting
                if elapsed >= self.config.disconnect_timeout =>
            {
                TransportState::Disconnected
            }
            _ => return None,
        };
        tracing::warn!(%state, ?elapsed, "transport state timed out");
        self.try_transition(target).then_some(target)
    }

    fn publish(&self, from: TransportState, to: TransportState) {
        tracing::info!(%from, %to, "transport state changed");
        self.watch_tx.send_replace(to);
        self.bus.emit(LobbyEvent::TransportStateChanged { from, to });
    }
}
