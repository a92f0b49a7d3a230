//! Runtime loop behaviour against `MemoryDirectory`, with paused time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lobbyforge_directory::{
    DirectoryClient, DirectoryError, DirectoryOp, MemoryDirectory,
    MemoryDirectoryConfig,
};
use lobbyforge_protocol::{
    EventBus, EventSubscription, LobbyEvent, Participant, ParticipantId,
    Session, SessionPatch, metadata,
};
use lobbyforge_runtime::{RuntimeConfig, RuntimeExit, RuntimeHandle, SessionRuntime};
use tokio_util::sync::CancellationToken;

// =========================================================================
// Helpers
// =========================================================================

fn pid(id: &str) -> ParticipantId {
    ParticipantId::new(id)
}

fn config() -> RuntimeConfig {
    RuntimeConfig {
        heartbeat_interval: Duration::from_secs(15),
        poll_interval: Duration::from_secs(3),
        poll_backoff_max: Duration::from_secs(30),
        max_heartbeat_failures: 3,
        start_jitter: Duration::ZERO,
    }
}

struct Fixture {
    dir: Arc<MemoryDirectory>,
    session: Session,
    bus: EventBus,
    sub: EventSubscription,
}

/// A session hosted by alice with bob and carol already in it.
async fn fixture() -> Fixture {
    let dir = Arc::new(MemoryDirectory::new(MemoryDirectoryConfig {
        session_ttl: None,
    }));
    let alice = DirectoryClient::new(dir.clone(), pid("alice"));
    let mut session = alice
        .create_session("Room", 4, BTreeMap::new())
        .await
        .unwrap();
    for who in ["bob", "carol"] {
        session = DirectoryClient::new(dir.clone(), pid(who))
            .join_session(&session.join_code, "")
            .await
            .unwrap();
    }
    let bus = EventBus::default();
    let sub = bus.subscribe();
    Fixture {
        dir,
        session,
        bus,
        sub,
    }
}

fn start_as(f: &Fixture, who: &str) -> RuntimeHandle {
    let client = Arc::new(DirectoryClient::new(f.dir.clone(), pid(who)));
    SessionRuntime::start(
        config(),
        client,
        f.session.clone(),
        f.bus.clone(),
        CancellationToken::new(),
    )
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

fn membership(events: &[LobbyEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            LobbyEvent::ParticipantLeft { participant, .. } => {
                Some(format!("left:{}", participant.id))
            }
            LobbyEvent::ParticipantJoined { participant, .. } => {
                Some(format!("joined:{}", participant.id))
            }
            LobbyEvent::ParticipantUpdated { current, .. } => {
                Some(format!("updated:{}", current.id))
            }
            _ => None,
        })
        .collect()
}

// =========================================================================
// Polling and diffing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_poll_emits_left_and_joined_only_for_changes() {
    let mut f = fixture().await;
    let handle = start_as(&f, "alice");

    f.dir.remote_remove_participant(&f.session.id, &pid("bob"));
    f.dir
        .remote_add_participant(&f.session.id, Participant::new(pid("dave")));
    advance(4).await;

    let events = f.sub.drain();
    assert_eq!(membership(&events), vec!["left:bob", "joined:dave"]);
    assert!(events.iter().any(|e| matches!(e, LobbyEvent::SessionUpdated(_))));
    assert!(handle.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_poll_forwards_snapshot_to_watchers() {
    let f = fixture().await;
    let handle = start_as(&f, "bob");
    let mut snapshots = handle.snapshots();

    f.dir.remote_update_session(
        &f.session.id,
        SessionPatch::new().set(metadata::RELAY_JOIN_CODE, "ABC123"),
    );

    let snapshot = snapshots
        .wait_for(|s| s.relay_join_code().is_some())
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.relay_join_code(), Some("ABC123"));
    assert_eq!(handle.latest().relay_join_code(), Some("ABC123"));
}

#[tokio::test(start_paused = true)]
async fn test_poll_not_found_stops_with_removed_and_goes_quiet() {
    let mut f = fixture().await;
    let handle = start_as(&f, "bob");

    f.dir.remote_delete_session(&f.session.id);
    advance(4).await;

    let events = f.sub.drain();
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, LobbyEvent::SessionRemoved { .. }))
            .count(),
        1
    );
    assert!(!handle.is_running());

    let polls = f.dir.calls(DirectoryOp::Get);
    advance(60).await;
    assert!(f.sub.drain().is_empty(), "no events after removal");
    assert_eq!(f.dir.calls(DirectoryOp::Get), polls);
    assert_eq!(handle.stop().await, RuntimeExit::SessionRemoved);
}

#[tokio::test(start_paused = true)]
async fn test_exit_watch_reports_removal_without_the_bus() {
    let f = fixture().await;
    let handle = start_as(&f, "bob");
    let mut exit = handle.exit_watch();
    assert_eq!(*exit.borrow(), None);
    drop(f.sub);

    f.dir.remote_delete_session(&f.session.id);
    let reason = *exit.wait_for(Option::is_some).await.unwrap();
    assert_eq!(reason, Some(RuntimeExit::SessionRemoved));
}

#[tokio::test(start_paused = true)]
async fn test_exit_watch_reports_stopped_on_cancel() {
    let f = fixture().await;
    let handle = start_as(&f, "bob");
    let exit = handle.exit_watch();

    assert_eq!(handle.stop().await, RuntimeExit::Stopped);
    assert_eq!(*exit.borrow(), Some(RuntimeExit::Stopped));
}

#[tokio::test(start_paused = true)]
async fn test_poll_transient_errors_back_off_then_reset() {
    let f = fixture().await;
    for _ in 0..3 {
        f.dir
            .fail_next(DirectoryOp::Get, DirectoryError::Transient("503".into()));
    }
    let _handle = start_as(&f, "bob");

    // Polls at t=3 (fail, +3s), t=6 (fail, +6s), t=12 (fail, +12s), t=24 (ok).
    advance(13).await;
    assert_eq!(f.dir.calls(DirectoryOp::Get), 3);
    advance(10).await;
    assert_eq!(f.dir.calls(DirectoryOp::Get), 3, "still backing off at t=23");
    advance(2).await;
    assert_eq!(f.dir.calls(DirectoryOp::Get), 4);

    // Back on the baseline cadence.
    advance(3).await;
    assert_eq!(f.dir.calls(DirectoryOp::Get), 5);
}

#[tokio::test(start_paused = true)]
async fn test_poll_rate_limited_honours_retry_after() {
    let f = fixture().await;
    f.dir.fail_next(
        DirectoryOp::Get,
        DirectoryError::RateLimited {
            retry_after: Some(Duration::from_secs(20)),
        },
    );
    let _handle = start_as(&f, "bob");

    advance(22).await;
    assert_eq!(f.dir.calls(DirectoryOp::Get), 1);
    advance(2).await;
    assert_eq!(f.dir.calls(DirectoryOp::Get), 2);
}

#[tokio::test(start_paused = true)]
async fn test_poll_without_local_participant_reports_kicked() {
    let mut f = fixture().await;
    let handle = start_as(&f, "carol");

    f.dir.remote_remove_participant(&f.session.id, &pid("carol"));
    advance(4).await;

    let events = f.sub.drain();
    assert!(events.iter().any(|e| matches!(e, LobbyEvent::Kicked { .. })));
    assert!(membership(&events).is_empty());
    assert_eq!(handle.stop().await, RuntimeExit::Kicked);
}

// =========================================================================
// Heartbeats and host migration
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_heartbeat_only_sent_by_host() {
    let f = fixture().await;
    let _host = start_as(&f, "alice");
    let _guest = start_as(&f, "bob");

    advance(31).await;

    assert_eq!(f.dir.calls(DirectoryOp::Heartbeat), 2);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_failures_report_session_lost() {
    let mut f = fixture().await;
    for _ in 0..3 {
        f.dir.fail_next(
            DirectoryOp::Heartbeat,
            DirectoryError::Transient("timeout".into()),
        );
    }
    let handle = start_as(&f, "alice");

    advance(46).await;

    let events = f.sub.drain();
    assert!(events.iter().any(|e| matches!(e, LobbyEvent::SessionLost { .. })));
    assert_eq!(handle.stop().await, RuntimeExit::SessionLost);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_failure_streak_resets_on_success() {
    let f = fixture().await;
    for _ in 0..2 {
        f.dir.fail_next(
            DirectoryOp::Heartbeat,
            DirectoryError::Transient("timeout".into()),
        );
    }
    let handle = start_as(&f, "alice");

    advance(46).await;
    f.dir.fail_next(
        DirectoryOp::Heartbeat,
        DirectoryError::Transient("timeout".into()),
    );
    advance(15).await;

    assert!(handle.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_host_migration_emits_host_changed_and_starts_heartbeat() {
    let mut f = fixture().await;
    let _handle = start_as(&f, "bob");

    f.dir.remote_remove_participant(&f.session.id, &pid("alice"));
    advance(4).await;

    let events = f.sub.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        LobbyEvent::HostChanged { previous, current, .. }
            if previous == &pid("alice") && current == &pid("bob")
    )));
    assert_eq!(f.dir.calls(DirectoryOp::Heartbeat), 0);

    advance(15).await;
    assert_eq!(f.dir.calls(DirectoryOp::Heartbeat), 1);
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_loop() {
    let f = fixture().await;
    let handle = start_as(&f, "alice");
    advance(4).await;

    assert_eq!(handle.stop().await, RuntimeExit::Stopped);

    let polls = f.dir.calls(DirectoryOp::Get);
    advance(30).await;
    assert_eq!(f.dir.calls(DirectoryOp::Get), polls);
}

#[tokio::test(start_paused = true)]
async fn test_parent_token_cancellation_stops_loop() {
    let f = fixture().await;
    let parent = CancellationToken::new();
    let client = Arc::new(DirectoryClient::new(f.dir.clone(), pid("bob")));
    let handle = SessionRuntime::start(
        config(),
        client,
        f.session.clone(),
        f.bus.clone(),
        parent.child_token(),
    );

    parent.cancel();
    advance(1).await;

    assert!(!handle.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_hung_poll_returns_promptly() {
    let f = fixture().await;
    f.dir.hang(DirectoryOp::Get);
    let handle = start_as(&f, "bob");
    advance(4).await;
    assert_eq!(f.dir.calls(DirectoryOp::Get), 1);

    let exit = tokio::time::timeout(Duration::from_secs(1), handle.stop()).await;

    assert_eq!(exit.ok(), Some(RuntimeExit::Stopped));
}
