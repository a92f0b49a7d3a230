//! Hook ordering, reentrancy and timeout behaviour of
//! `SessionStateMachine`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lobbyforge_protocol::{ErrorKind, EventBus, LobbyEvent, SessionState};
use lobbyforge_session::{
    NoHooks, SessionError, SessionHooks, SessionMachineConfig,
    SessionStateMachine,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

// =========================================================================
// Helpers
// =========================================================================

/// Records every hook call; optionally blocks on entering one state.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    block_on_enter: Mutex<Option<SessionState>>,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl SessionHooks for Recorder {
    async fn on_exit(&self, state: SessionState, next: SessionState) {
        self.calls.lock().push(format!("exit {state}->{next}"));
    }

    async fn on_enter(&self, state: SessionState, previous: SessionState) {
        self.calls.lock().push(format!("enter {previous}->{state}"));
        let block = *self.block_on_enter.lock() == Some(state);
        if block {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

fn machine_with(
    hooks: Arc<dyn SessionHooks>,
) -> (Arc<SessionStateMachine>, lobbyforge_protocol::EventSubscription) {
    let bus = EventBus::default();
    let sub = bus.subscribe();
    let m = SessionStateMachine::new(SessionMachineConfig::default(), bus, hooks);
    (Arc::new(m), sub)
}

fn machine() -> (Arc<SessionStateMachine>, lobbyforge_protocol::EventSubscription) {
    machine_with(Arc::new(NoHooks))
}

// =========================================================================
// Hooks
// =========================================================================

#[tokio::test]
async fn test_hooks_run_exit_then_enter() {
    let recorder = Arc::new(Recorder::default());
    let (m, _sub) = machine_with(recorder.clone());

    m.try_transition(SessionState::Creating).await;
    m.try_transition(SessionState::Active).await;

    assert_eq!(
        *recorder.calls.lock(),
        vec![
            "exit Idle->Creating",
            "enter Idle->Creating",
            "exit Creating->Active",
            "enter Creating->Active",
        ]
    );
}

#[tokio::test]
async fn test_rejected_transition_runs_no_hooks() {
    let recorder = Arc::new(Recorder::default());
    let (m, _sub) = machine_with(recorder.clone());

    assert!(!m.try_transition(SessionState::Leaving).await);

    assert!(recorder.calls.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transition_during_hook_is_rejected() {
    let recorder = Arc::new(Recorder::default());
    *recorder.block_on_enter.lock() = Some(SessionState::Creating);
    let (m, mut sub) = machine_with(recorder.clone());

    let first = tokio::spawn({
        let m = m.clone();
        async move { m.try_transition(SessionState::Creating).await }
    });
    recorder.entered.notified().await;

    assert_eq!(m.state(), SessionState::Creating);
    assert_eq!(
        m.transition(SessionState::Failed).await,
        Err(SessionError::TransitionInProgress)
    );

    recorder.release.notify_one();
    assert!(first.await.unwrap());
    assert!(m.try_transition(SessionState::Failed).await);

    let changes = sub
        .drain()
        .into_iter()
        .filter(|e| matches!(e, LobbyEvent::SessionStateChanged { .. }))
        .count();
    assert_eq!(changes, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_transition_releases_flag() {
    let recorder = Arc::new(Recorder::default());
    *recorder.block_on_enter.lock() = Some(SessionState::Joining);
    let (m, _sub) = machine_with(recorder.clone());

    let task = tokio::spawn({
        let m = m.clone();
        async move { m.try_transition(SessionState::Joining).await }
    });
    recorder.entered.notified().await;
    assert!(m.is_transitioning());

    task.abort();
    let _ = task.await;

    assert!(!m.is_transitioning());
    assert!(m.try_transition(SessionState::Failed).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_force_during_hook_supersedes_transition() {
    let recorder = Arc::new(Recorder::default());
    *recorder.block_on_enter.lock() = Some(SessionState::Creating);
    let (m, _sub) = machine_with(recorder.clone());

    let task = tokio::spawn({
        let m = m.clone();
        async move { m.try_transition(SessionState::Creating).await }
    });
    recorder.entered.notified().await;

    m.force(SessionState::Idle);
    assert!(!m.is_transitioning());
    assert!(m.try_transition(SessionState::Joining).await);

    recorder.release.notify_one();
    let _ = task.await;
    assert_eq!(m.state(), SessionState::Joining);
    assert!(!m.is_transitioning(), "stale guard must not touch the new epoch");
}

// =========================================================================
// Timeouts
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_tick_creating_timeout_fails_with_timeout_kind() {
    let (m, mut sub) = machine();
    m.try_transition(SessionState::Creating).await;

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(m.tick().await, None);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(m.tick().await, Some(SessionState::Failed));

    let failed = sub.drain().into_iter().find_map(|e| match e {
        LobbyEvent::OperationFailed { kind, .. } => Some(kind),
        _ => None,
    });
    assert_eq!(failed, Some(ErrorKind::Timeout));
}

#[tokio::test(start_paused = true)]
async fn test_tick_leaving_timeout_goes_to_idle() {
    let (m, _sub) = machine();
    for s in [SessionState::Creating, SessionState::Active, SessionState::Leaving] {
        m.try_transition(s).await;
    }

    tokio::time::sleep(Duration::from_secs(16)).await;

    assert_eq!(m.tick().await, Some(SessionState::Idle));
}

#[tokio::test(start_paused = true)]
async fn test_tick_failed_recovers_after_grace() {
    let (m, _sub) = machine();
    m.try_transition(SessionState::Joining).await;
    m.fail(ErrorKind::NotFound, "no such session").await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(m.tick().await, None);
    assert_eq!(m.state(), SessionState::Failed);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(m.tick().await, Some(SessionState::Idle));
}

#[tokio::test(start_paused = true)]
async fn test_tick_active_never_times_out() {
    let (m, _sub) = machine();
    m.try_transition(SessionState::Creating).await;
    m.try_transition(SessionState::Active).await;

    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(m.tick().await, None);
    assert_eq!(m.state(), SessionState::Active);
}

#[tokio::test]
async fn test_watch_receiver_tracks_state() {
    let (m, _sub) = machine();
    let rx = m.subscribe();

    m.try_transition(SessionState::Joining).await;

    assert_eq!(*rx.borrow(), SessionState::Joining);
}
