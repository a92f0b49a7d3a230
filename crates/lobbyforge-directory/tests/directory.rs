//! Integration tests for `DirectoryClient` over `MemoryDirectory`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lobbyforge_directory::{
    DirectoryClient, DirectoryError, DirectoryOp, MemoryDirectory,
    MemoryDirectoryConfig,
};
use lobbyforge_protocol::{
    ParticipantId, ParticipantPatch, SessionPatch, metadata, participant_data,
};

// =========================================================================
// Helpers
// =========================================================================

fn pid(id: &str) -> ParticipantId {
    ParticipantId::new(id)
}

fn directory() -> Arc<MemoryDirectory> {
    Arc::new(MemoryDirectory::new(MemoryDirectoryConfig {
        session_ttl: None,
    }))
}

fn client(dir: &Arc<MemoryDirectory>, who: &str) -> DirectoryClient {
    let c = DirectoryClient::new(dir.clone(), pid(who));
    c.set_profile_value(participant_data::DISPLAY_NAME, who);
    c
}

fn with_password(pwd: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(metadata::PASSWORD.to_string(), pwd.to_string())])
}

// =========================================================================
// create / join
// =========================================================================

#[tokio::test]
async fn test_create_session_makes_caller_host() {
    let dir = directory();
    let host = client(&dir, "alice");

    let session = host
        .create_session("Room", 4, BTreeMap::new())
        .await
        .expect("create should succeed");

    assert_eq!(session.host_id, pid("alice"));
    assert_eq!(session.participants.len(), 1);
    assert_eq!(session.participants[0].display_name(), Some("alice"));
    assert_eq!(session.join_code.len(), 6);
    assert_eq!(host.current_session(), Some(session.id));
}

#[tokio::test]
async fn test_create_session_invalid_input_never_reaches_service() {
    let dir = directory();
    let host = client(&dir, "alice");

    let result = host.create_session("", 4, BTreeMap::new()).await;
    assert!(matches!(result, Err(DirectoryError::Validation(_))));

    let result = host.create_session("Room", 1, BTreeMap::new()).await;
    assert!(matches!(result, Err(DirectoryError::Validation(_))));

    let result = host.create_session("Room", 4, with_password("short")).await;
    assert!(matches!(result, Err(DirectoryError::Validation(_))));

    assert_eq!(dir.calls(DirectoryOp::Create), 0);
}

#[tokio::test]
async fn test_join_session_by_code_adds_participant() {
    let dir = directory();
    let host = client(&dir, "alice");
    let guest = client(&dir, "bob");
    let created = host.create_session("Room", 4, BTreeMap::new()).await.unwrap();

    let joined = guest
        .join_session(&created.join_code.to_lowercase(), "")
        .await
        .expect("join should succeed");

    assert_eq!(joined.id, created.id);
    assert!(joined.contains(&pid("bob")));
    assert_eq!(guest.current_session(), Some(created.id));
}

#[tokio::test]
async fn test_join_session_unknown_code_returns_not_found() {
    let dir = directory();
    let guest = client(&dir, "bob");

    let result = guest.join_session("ZZZZZZ", "").await;

    assert!(matches!(result, Err(DirectoryError::NotFound(_))));
    assert_eq!(guest.current_session(), None);
}

#[tokio::test]
async fn test_join_session_wrong_password_is_forbidden() {
    let dir = directory();
    let host = client(&dir, "alice");
    let guest = client(&dir, "bob");
    let created = host
        .create_session("Room", 4, with_password("hunter2hunter2"))
        .await
        .unwrap();

    let wrong = guest.join_session(&created.join_code, "nope-nope").await;
    assert!(matches!(wrong, Err(DirectoryError::Forbidden(_))));

    let right = guest.join_session(&created.join_code, "hunter2hunter2").await;
    assert!(right.is_ok());
}

#[tokio::test]
async fn test_join_full_session_returns_conflict() {
    let dir = directory();
    let host = client(&dir, "alice");
    let created = host.create_session("Duel", 2, BTreeMap::new()).await.unwrap();
    client(&dir, "bob").join_session(&created.join_code, "").await.unwrap();

    let result = client(&dir, "carol").join_session(&created.join_code, "").await;

    assert!(matches!(result, Err(DirectoryError::Conflict(_))));
}

#[tokio::test]
async fn test_join_twice_is_idempotent() {
    let dir = directory();
    let created = client(&dir, "alice")
        .create_session("Room", 4, BTreeMap::new())
        .await
        .unwrap();
    let guest = client(&dir, "bob");

    guest.join_session(&created.join_code, "").await.unwrap();
    let again = guest.join_session(&created.join_code, "").await.unwrap();

    assert_eq!(again.participants.len(), 2);
}

// =========================================================================
// leave / kick / remove
// =========================================================================

#[tokio::test]
async fn test_kick_by_non_host_is_forbidden() {
    let dir = directory();
    let host = client(&dir, "alice");
    let created = host.create_session("Room", 4, BTreeMap::new()).await.unwrap();
    let bob = client(&dir, "bob");
    bob.join_session(&created.join_code, "").await.unwrap();
    client(&dir, "carol").join_session(&created.join_code, "").await.unwrap();

    let result = bob.kick_participant(&created.id, &pid("carol")).await;
    assert!(matches!(result, Err(DirectoryError::Forbidden(_))));

    host.kick_participant(&created.id, &pid("carol")).await.unwrap();
    assert!(!dir.snapshot(&created.id).unwrap().contains(&pid("carol")));
}

#[tokio::test]
async fn test_kick_self_is_rejected_locally() {
    let dir = directory();
    let host = client(&dir, "alice");
    let created = host.create_session("Room", 4, BTreeMap::new()).await.unwrap();

    let result = host.kick_participant(&created.id, &pid("alice")).await;

    assert!(matches!(result, Err(DirectoryError::Validation(_))));
    assert_eq!(dir.calls(DirectoryOp::RemoveParticipant), 0);
}

#[tokio::test]
async fn test_host_leaving_migrates_host() {
    let dir = directory();
    let host = client(&dir, "alice");
    let created = host.create_session("Room", 4, BTreeMap::new()).await.unwrap();
    client(&dir, "bob").join_session(&created.join_code, "").await.unwrap();

    host.leave_current().await.expect("leave should succeed");

    let snapshot = dir.snapshot(&created.id).expect("session survives");
    assert_eq!(snapshot.host_id, pid("bob"));
    assert_eq!(host.current_session(), None);
}

#[tokio::test]
async fn test_last_participant_leaving_deletes_session() {
    let dir = directory();
    let host = client(&dir, "alice");
    let created = host.create_session("Room", 4, BTreeMap::new()).await.unwrap();

    host.leave_current().await.unwrap();

    assert!(dir.snapshot(&created.id).is_none());
    assert_eq!(dir.session_count(), 0);
}

#[tokio::test]
async fn test_remove_session_host_only() {
    let dir = directory();
    let host = client(&dir, "alice");
    let created = host.create_session("Room", 4, BTreeMap::new()).await.unwrap();
    let bob = client(&dir, "bob");
    bob.join_session(&created.join_code, "").await.unwrap();

    let result = bob.remove_session(&created.id).await;
    assert!(matches!(result, Err(DirectoryError::Forbidden(_))));

    host.remove_session(&created.id).await.unwrap();
    let gone = bob.get_session(&created.id).await;
    assert!(matches!(gone, Err(DirectoryError::NotFound(_))));
}

// =========================================================================
// updates
// =========================================================================

#[tokio::test]
async fn test_update_session_by_host_applies_patch() {
    let dir = directory();
    let host = client(&dir, "alice");
    host.create_session("Room", 4, BTreeMap::new()).await.unwrap();

    let updated = host
        .update_current(
            SessionPatch::new()
                .name("Renamed")
                .set(metadata::RELAY_JOIN_CODE, "ABC123"),
        )
        .await
        .unwrap();

    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.relay_join_code(), Some("ABC123"));
}

#[tokio::test]
async fn test_update_max_below_member_count_rejected() {
    let dir = directory();
    let host = client(&dir, "alice");
    let created = host.create_session("Room", 4, BTreeMap::new()).await.unwrap();
    client(&dir, "bob").join_session(&created.join_code, "").await.unwrap();
    client(&dir, "carol").join_session(&created.join_code, "").await.unwrap();

    let result = host
        .update_session(&created.id, SessionPatch::new().max_participants(2))
        .await;

    assert!(matches!(result, Err(DirectoryError::Validation(_))));
}

#[tokio::test]
async fn test_update_participant_ready_flag() {
    let dir = directory();
    let created = client(&dir, "alice")
        .create_session("Room", 4, BTreeMap::new())
        .await
        .unwrap();
    let bob = client(&dir, "bob");
    bob.join_session(&created.join_code, "").await.unwrap();

    let snapshot = bob
        .update_participant(
            &created.id,
            &pid("bob"),
            ParticipantPatch::new().set(participant_data::IS_READY, "true"),
        )
        .await
        .unwrap();

    assert!(snapshot.participant(&pid("bob")).unwrap().is_ready());
}

#[tokio::test]
async fn test_convenience_calls_without_session_fail() {
    let dir = directory();
    let c = client(&dir, "alice");

    assert!(matches!(
        c.get_current().await,
        Err(DirectoryError::NoCurrentSession)
    ));
    assert!(matches!(
        c.leave_current().await,
        Err(DirectoryError::NoCurrentSession)
    ));
}

// =========================================================================
// heartbeat / expiry
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_session_expires_without_heartbeat() {
    let dir = Arc::new(MemoryDirectory::new(MemoryDirectoryConfig {
        session_ttl: Some(Duration::from_secs(30)),
    }));
    let host = client(&dir, "alice");
    let created = host.create_session("Room", 4, BTreeMap::new()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(20)).await;
    host.heartbeat(&created.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(host.get_session(&created.id).await.is_ok(), "heartbeat kept it alive");

    tokio::time::sleep(Duration::from_secs(31)).await;
    let result = host.get_session(&created.id).await;
    assert!(matches!(result, Err(DirectoryError::NotFound(_))));
}

#[tokio::test]
async fn test_heartbeat_by_non_host_forbidden() {
    let dir = directory();
    let created = client(&dir, "alice")
        .create_session("Room", 4, BTreeMap::new())
        .await
        .unwrap();
    let bob = client(&dir, "bob");
    bob.join_session(&created.join_code, "").await.unwrap();

    let result = bob.heartbeat(&created.id).await;
    assert!(matches!(result, Err(DirectoryError::Forbidden(_))));
}

// =========================================================================
// fault injection
// =========================================================================

#[tokio::test]
async fn test_fail_next_is_consumed_once_and_passed_through() {
    let dir = directory();
    let host = client(&dir, "alice");
    dir.fail_next(DirectoryOp::Create, DirectoryError::Transient("502".into()));

    let first = host.create_session("Room", 4, BTreeMap::new()).await;
    assert_eq!(first, Err(DirectoryError::Transient("502".into())));

    let second = host.create_session("Room", 4, BTreeMap::new()).await;
    assert!(second.is_ok());
    assert_eq!(dir.calls(DirectoryOp::Create), 2);
}

#[tokio::test(start_paused = true)]
async fn test_hung_operation_pends_until_unhung() {
    let dir = directory();
    let host = Arc::new(client(&dir, "alice"));
    dir.hang(DirectoryOp::Create);

    let pending = {
        let host = host.clone();
        tokio::spawn(async move { host.create_session("Room", 4, BTreeMap::new()).await })
    };
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!pending.is_finished(), "hung create should not complete");

    dir.unhang(DirectoryOp::Create);
    let created = pending.await.unwrap();
    assert!(created.is_ok());
    assert_eq!(dir.calls(DirectoryOp::Create), 1);
    assert!(host.create_session("Room", 4, BTreeMap::new()).await.is_ok());
}
