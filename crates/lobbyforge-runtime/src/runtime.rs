//! The runtime loop and its handle.

use std::sync::Arc;

use lobbyforge_cadence::{Backoff, BackoffConfig, Cadence};
use lobbyforge_directory::{DirectoryClient, DirectoryError};
use lobbyforge_protocol::{EventBus, LobbyEvent, ParticipantId, Session, SessionId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{RuntimeConfig, diff_participants};

/// Why a runtime loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeExit {
    /// Cancelled by its owner.
    Stopped,
    /// The directory no longer knows the session.
    SessionRemoved,
    /// The local participant is no longer in the session.
    Kicked,
    /// Heartbeats failed too many times in a row.
    SessionLost,
}

/// Handle to a running runtime loop.
///
/// Dropping the handle cancels the loop.
pub struct RuntimeHandle {
    session_id: SessionId,
    cancel: CancellationToken,
    task: Option<JoinHandle<RuntimeExit>>,
    snapshot: watch::Receiver<Session>,
    exit: watch::Receiver<Option<RuntimeExit>>,
}

impl RuntimeHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// `true` until the loop has exited.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// The most recent snapshot the loop has seen.
    pub fn latest(&self) -> Session {
        self.snapshot.borrow().clone()
    }

    /// A receiver updated on every successful poll. Closed once the loop
    /// exits.
    pub fn snapshots(&self) -> watch::Receiver<Session> {
        self.snapshot.clone()
    }

    /// `None` while the loop runs, then why it ended. Unlike the bus
    /// events, this can't be missed by a slow reader.
    pub fn exit_watch(&self) -> watch::Receiver<Option<RuntimeExit>> {
        self.exit.clone()
    }

    /// Cancels the loop and waits for it to finish.
    pub async fn stop(mut self) -> RuntimeExit {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "session runtime task panicked");
                RuntimeExit::Stopped
            }),
            None => RuntimeExit::Stopped,
        }
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Entry point for starting runtime loops.
pub struct SessionRuntime;

impl SessionRuntime {
    /// Spawns the loop for `initial`. `cancel` should be a child of the
    /// owner's token so shutting the owner down stops the loop too.
    pub fn start(
        config: RuntimeConfig,
        client: Arc<DirectoryClient>,
        initial: Session,
        bus: EventBus,
        cancel: CancellationToken,
    ) -> RuntimeHandle {
        let config = config.validated();
        let (snapshot_tx, snapshot_rx) = watch::channel(initial.clone());
        let (exit_tx, exit_rx) = watch::channel(None);
        let session_id = initial.id.clone();
        let local = client.local_participant().clone();

        let backoff = Backoff::new(BackoffConfig {
            base: config.poll_interval,
            max: config.poll_backoff_max,
            ..BackoffConfig::default()
        });
        let mut heartbeat = Cadence::new("heartbeat", config.heartbeat_interval);
        if !initial.is_host(&local) {
            heartbeat.pause();
        }
        let poll =
            Cadence::with_jitter("poll", config.poll_interval, config.start_jitter);

        let worker = RuntimeLoop {
            config,
            client,
            local,
            last: initial,
            bus,
            cancel: cancel.clone(),
            heartbeat,
            poll,
            backoff,
            heartbeat_failures: 0,
            snapshot_tx,
            exit_tx,
        };

        tracing::info!(%session_id, "session runtime started");
        RuntimeHandle {
            session_id,
            cancel,
            task: Some(tokio::spawn(worker.run())),
            snapshot: snapshot_rx,
            exit: exit_rx,
        }
    }
}

/// State owned by the spawned loop.
struct RuntimeLoop {
    config: RuntimeConfig,
    client: Arc<DirectoryClient>,
    local: ParticipantId,
    last: Session,
    bus: EventBus,
    cancel: CancellationToken,
    heartbeat: Cadence,
    poll: Cadence,
    backoff: Backoff,
    heartbeat_failures: u32,
    snapshot_tx: watch::Sender<Session>,
    exit_tx: watch::Sender<Option<RuntimeExit>>,
}

impl RuntimeLoop {
    async fn run(mut self) -> RuntimeExit {
        let exit = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break RuntimeExit::Stopped,
                _ = self.heartbeat.wait() => {
                    if let Some(exit) = self.send_heartbeat().await {
                        break exit;
                    }
                }
                _ = self.poll.wait() => {
                    if let Some(exit) = self.poll_once().await {
                        break exit;
                    }
                }
            }
        };
        tracing::info!(session_id = %self.last.id, ?exit, "session runtime stopped");
        self.exit_tx.send_replace(Some(exit));
        exit
    }

    async fn send_heartbeat(&mut self) -> Option<RuntimeExit> {
        let id = self.last.id.clone();
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Some(RuntimeExit::Stopped),
            r = self.client.heartbeat(&id) => r,
        };
        match result {
            Ok(()) => {
                self.heartbeat_failures = 0;
                None
            }
            Err(e) if e.is_not_found() => Some(self.removed()),
            Err(e) => {
                self.heartbeat_failures += 1;
                tracing::warn!(
                    session_id = %id,
                    error = %e,
                    failures = self.heartbeat_failures,
                    "heartbeat failed"
                );
                if self.heartbeat_failures >= self.config.max_heartbeat_failures {
                    self.bus.emit(LobbyEvent::SessionLost { session_id: id });
                    return Some(RuntimeExit::SessionLost);
                }
                None
            }
        }
    }

    async fn poll_once(&mut self) -> Option<RuntimeExit> {
        let id = self.last.id.clone();
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Some(RuntimeExit::Stopped),
            r = self.client.get_session(&id) => r,
        };
        match result {
            Ok(snapshot) => {
                self.backoff.reset();
                self.apply(snapshot)
            }
            Err(e) if e.is_not_found() => Some(self.removed()),
            Err(e) => {
                self.back_off(&e);
                None
            }
        }
    }

    fn back_off(&mut self, error: &DirectoryError) {
        let delay = error
            .retry_after()
            .unwrap_or_else(|| self.backoff.next_delay());
        tracing::warn!(
            session_id = %self.last.id,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "poll failed, backing off"
        );
        self.poll.delay_next(delay);
    }

    fn removed(&self) -> RuntimeExit {
        tracing::info!(session_id = %self.last.id, "session no longer exists");
        self.bus.emit(LobbyEvent::SessionRemoved {
            session_id: self.last.id.clone(),
        });
        RuntimeExit::SessionRemoved
    }

    /// Publishes what changed between the last snapshot and `snapshot`.
    fn apply(&mut self, snapshot: Session) -> Option<RuntimeExit> {
        let session_id = snapshot.id.clone();

        if !snapshot.contains(&self.local) {
            tracing::info!(%session_id, local = %self.local, "no longer a member");
            self.bus.emit(LobbyEvent::Kicked { session_id });
            return Some(RuntimeExit::Kicked);
        }

        for event in
            diff_participants(&session_id, &self.last.participants, &snapshot.participants)
        {
            self.bus.emit(event);
        }

        if snapshot.host_id != self.last.host_id {
            tracing::info!(
                %session_id,
                previous = %self.last.host_id,
                current = %snapshot.host_id,
                "host changed"
            );
            self.bus.emit(LobbyEvent::HostChanged {
                session_id,
                previous: self.last.host_id.clone(),
                current: snapshot.host_id.clone(),
            });
            if snapshot.is_host(&self.local) {
                self.heartbeat.resume();
            } else {
                self.heartbeat.pause();
            }
        }

        self.bus.emit(LobbyEvent::SessionUpdated(snapshot.clone()));
        self.snapshot_tx.send_replace(snapshot.clone());
        self.last = snapshot;
        None
    }
}
