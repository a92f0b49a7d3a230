//! Integration tests for `RelayCoordinator` over `MemoryRelay`.

use std::sync::Arc;

use lobbyforge_protocol::TransportRole;
use lobbyforge_relay::{MemoryRelay, RelayCoordinator, RelayError, RelayOp};

fn setup() -> (Arc<MemoryRelay>, RelayCoordinator) {
    let relay = Arc::new(MemoryRelay::new());
    let coordinator = RelayCoordinator::new(relay.clone());
    (relay, coordinator)
}

#[tokio::test]
async fn test_setup_host_relay_returns_host_config_and_code() {
    let (relay, coordinator) = setup();
    relay.script_join_code("ABC123");

    let (config, code) = coordinator.setup_host_relay(3).await.unwrap();

    assert_eq!(code, "ABC123");
    assert_eq!(config.role, TransportRole::Host);
    assert_eq!(config.max_connections, 3);
    assert!(config.host_connection_data.is_none());
    assert_eq!(coordinator.hosted_join_code().as_deref(), Some("ABC123"));
}

#[tokio::test]
async fn test_setup_host_relay_twice_reuses_allocation() {
    let (relay, coordinator) = setup();

    let (first, code_a) = coordinator.setup_host_relay(3).await.unwrap();
    let (second, code_b) = coordinator.setup_host_relay(2).await.unwrap();

    assert_eq!(first.allocation_id, second.allocation_id);
    assert_eq!(code_a, code_b);
    assert_eq!(relay.calls(RelayOp::Allocate), 1);
    assert_eq!(relay.allocation_count(), 1);
}

#[tokio::test]
async fn test_setup_host_relay_larger_request_allocates_again() {
    let (relay, coordinator) = setup();

    coordinator.setup_host_relay(1).await.unwrap();
    let (config, _) = coordinator.setup_host_relay(5).await.unwrap();

    assert_eq!(config.max_connections, 5);
    assert_eq!(relay.calls(RelayOp::Allocate), 2);
}

#[tokio::test]
async fn test_release_forgets_cached_allocation() {
    let (relay, coordinator) = setup();
    coordinator.setup_host_relay(3).await.unwrap();

    coordinator.release();
    coordinator.release();
    coordinator.setup_host_relay(3).await.unwrap();

    assert!(coordinator.hosted_join_code().is_some());
    assert_eq!(relay.calls(RelayOp::Allocate), 2);
}

#[tokio::test]
async fn test_join_as_client_resolves_host_allocation() {
    let (relay, coordinator) = setup();
    relay.script_join_code("ABC123");
    let (host, _) = coordinator.setup_host_relay(3).await.unwrap();

    let client = RelayCoordinator::new(relay.clone());
    let config = client.join_as_client("abc123").await.unwrap();

    assert_eq!(config.role, TransportRole::Client);
    assert_eq!(config.allocation_id, host.allocation_id);
    assert_eq!(config.host_connection_data, Some(host.connection_data));
    assert_eq!(config.key, host.key);
}

#[tokio::test]
async fn test_join_as_client_unknown_code_not_found() {
    let (_relay, coordinator) = setup();

    let result = coordinator.join_as_client("NOPE99").await;

    assert!(matches!(result, Err(RelayError::NotFound(_))));
}

#[tokio::test]
async fn test_join_as_client_invalid_code_skips_service() {
    let (relay, coordinator) = setup();

    let result = coordinator.join_as_client("AB").await;

    assert!(matches!(result, Err(RelayError::Validation(_))));
    assert_eq!(relay.calls(RelayOp::Join), 0);
}

#[tokio::test]
async fn test_join_full_allocation_rejected() {
    let (relay, coordinator) = setup();
    relay.script_join_code("ABC123");
    coordinator.setup_host_relay(1).await.unwrap();

    let client = RelayCoordinator::new(relay.clone());
    client.join_as_client("ABC123").await.unwrap();
    let second = client.join_as_client("ABC123").await;

    assert!(matches!(second, Err(RelayError::Full(_))));
}

#[tokio::test]
async fn test_allocation_failure_leaves_nothing_cached() {
    let (relay, coordinator) = setup();
    relay.fail_next(RelayOp::GetJoinCode, RelayError::Transient("timeout".into()));

    let result = coordinator.setup_host_relay(3).await;

    assert_eq!(result.unwrap_err(), RelayError::Transient("timeout".into()));
    assert_eq!(coordinator.hosted_join_code(), None);
}

#[tokio::test]
async fn test_expired_allocation_cannot_be_joined() {
    let (relay, coordinator) = setup();
    relay.script_join_code("ABC123");
    let (config, _) = coordinator.setup_host_relay(3).await.unwrap();

    relay.expire_allocation(&config.allocation_id);

    let client = RelayCoordinator::new(relay.clone());
    assert!(matches!(
        client.join_as_client("ABC123").await,
        Err(RelayError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_hung_allocation_completes_after_unhang() {
    let (relay, coordinator) = setup();
    let coordinator = Arc::new(coordinator);
    relay.hang(RelayOp::Allocate);

    let pending = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.setup_host_relay(3).await })
    };
    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
    assert!(!pending.is_finished());

    relay.unhang(RelayOp::Allocate);
    assert!(pending.await.unwrap().is_ok());
    assert_eq!(relay.calls(RelayOp::Allocate), 1);
}
