use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lobbyforge::prelude::*;

// ---------------------------------------------------------------------------
// Shared world
// ---------------------------------------------------------------------------

/// One directory, one relay and one network, shared by every player the
/// way the real services would be.
struct World {
    directory: Arc<MemoryDirectory>,
    relay: Arc<MemoryRelay>,
    network: Arc<MemoryNetwork>,
}

impl World {
    fn new() -> Self {
        Self {
            directory: Arc::new(MemoryDirectory::default()),
            relay: Arc::new(MemoryRelay::new()),
            network: MemoryNetwork::new(),
        }
    }

    fn player(&self, id: &str, name: &str) -> Result<Orchestrator, LobbyError> {
        let mut config = LobbyConfig::default();
        config.runtime.poll_interval = Duration::from_millis(500);
        Orchestrator::builder()
            .config(config)
            .local_participant(ParticipantId::new(id))
            .profile(participant_data::DISPLAY_NAME, name)
            .directory(self.directory.clone())
            .relay(self.relay.clone())
            .transport(Arc::new(self.network.driver()))
            .build()
    }
}

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Outcome {
    everyone_ready: bool,
    host_events: usize,
}

/// Waits until the host's view of the lobby satisfies `done`.
async fn until(lobby: &Orchestrator, done: impl Fn(&Session) -> bool) -> bool {
    for _ in 0..40 {
        if lobby.current_session().is_some_and(|s| done(&s)) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

async fn run() -> Result<Outcome, LobbyError> {
    let world = World::new();
    let host = world.player("p-ada", "Ada")?;
    let guests = [
        world.player("p-grace", "Grace")?,
        world.player("p-linus", "Linus")?,
    ];

    let mut events = host.subscribe();

    let mut metadata = BTreeMap::new();
    metadata.insert("GameMode".to_string(), "duel".to_string());
    let session = host.create_session("Friday Night", 4, metadata).await?;
    tracing::info!(code = %session.join_code, "lobby open");

    for guest in &guests {
        guest.join_session(&session.join_code, "").await?;
    }
    until(&host, |s| s.participant_count() == 3).await;

    host.set_ready(true).await?;
    for guest in &guests {
        guest.set_ready(true).await?;
    }
    let everyone_ready = until(&host, Session::all_ready).await;
    if everyone_ready {
        host.set_phase(SessionPhase::Starting).await?;
    }

    guests[1].leave_session().await?;
    until(&host, |s| s.participant_count() == 2).await;
    host.remove_session().await?;

    for guest in &guests {
        guest.shutdown().await;
    }
    host.shutdown().await;

    let seen = events.drain();
    for event in &seen {
        tracing::info!(?event, "host saw");
    }
    Ok(Outcome {
        everyone_ready,
        host_events: seen.len(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    lobbyforge::logging::init_with_default("lobbyforge=info,lobby_demo=info");

    let outcome = run().await?;
    eprintln!(
        "lobby finished: everyone ready = {}, host saw {} events",
        outcome.everyone_ready, outcome.host_events
    );
    Ok(())
}
