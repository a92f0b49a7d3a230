//! The identity registry: directory participants ↔ transport connections.
//!
//! The session directory and the transport hand out identities
//! independently. A participant is known to the directory long before
//! their transport connection exists, and the transport never learns
//! directory ids on its own. This registry is where the two meet.
//!
//! # How mappings are made
//!
//! - **Confirmed**: the remote side said who it is (the `Hello`/`Welcome`
//!   handshake). Registered with [`register_mapping`](IdentityRegistry::register_mapping).
//! - **Speculative**: a connection arrived and exactly one participant
//!   was still unmapped, so they're probably the same. Registered with
//!   [`register_speculative`](IdentityRegistry::register_speculative) and
//!   replaced as soon as a handshake confirms (or contradicts) it.
//!
//! # Concurrency note
//!
//! Like the rest of the bookkeeping types, `IdentityRegistry` is a plain
//! `&mut self` struct with two `HashMap`s. The orchestrator wraps it in
//! a mutex; nothing here locks.

use std::collections::HashMap;

use lobbyforge_protocol::{
    ConnectionId, EventBus, LobbyEvent, ParticipantId, Session,
};

/// One participant ↔ connection pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMapping {
    pub participant: ParticipantId,
    pub connection: ConnectionId,
    /// `false` while the pairing is only a guess.
    pub confirmed: bool,
}

/// Bidirectional participant/connection map.
///
/// Invariant: at most one mapping per participant and per connection.
/// `by_participant` owns the mappings; `by_connection` is an index kept
/// in lockstep with it.
#[derive(Default)]
pub struct IdentityRegistry {
    by_participant: HashMap<ParticipantId, IdentityMapping>,
    by_connection: HashMap<ConnectionId, ParticipantId>,
    /// Where change notifications go. Purely informational.
    bus: Option<EventBus>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that reports changes as
    /// [`LobbyEvent::IdentityMappingChanged`].
    pub fn with_events(bus: EventBus) -> Self {
        Self {
            bus: Some(bus),
            ..Self::default()
        }
    }

    /// Records a confirmed mapping, evicting any mapping that shares
    /// either key.
    pub fn register_mapping(
        &mut self,
        participant: ParticipantId,
        connection: ConnectionId,
    ) {
        self.insert(participant, connection, true);
    }

    /// Records a guessed mapping. Refused (returns `false`) when either
    /// key already belongs to a confirmed mapping: a guess never
    /// overrides what a handshake established.
    pub fn register_speculative(
        &mut self,
        participant: ParticipantId,
        connection: ConnectionId,
    ) -> bool {
        let participant_confirmed = self
            .by_participant
            .get(&participant)
            .is_some_and(|m| m.confirmed);
        let connection_confirmed = self
            .by_connection
            .get(&connection)
            .and_then(|p| self.by_participant.get(p))
            .is_some_and(|m| m.confirmed);
        if participant_confirmed || connection_confirmed {
            tracing::debug!(%participant, %connection, "speculative mapping refused");
            return false;
        }
        self.insert(participant, connection, false);
        true
    }

    /// Upgrades a speculative mapping. Returns `false` if there is none.
    pub fn confirm(&mut self, participant: &ParticipantId) -> bool {
        let Some(mapping) = self.by_participant.get_mut(participant) else {
            return false;
        };
        if !mapping.confirmed {
            mapping.confirmed = true;
            let connection = mapping.connection;
            tracing::debug!(%participant, %connection, "mapping confirmed");
            self.notify(participant.clone(), Some(connection), true);
        }
        true
    }

    pub fn try_resolve_connection(
        &self,
        participant: &ParticipantId,
    ) -> Option<ConnectionId> {
        self.by_participant.get(participant).map(|m| m.connection)
    }

    pub fn try_resolve_participant(
        &self,
        connection: ConnectionId,
    ) -> Option<ParticipantId> {
        self.by_connection.get(&connection).cloned()
    }

    pub fn mapping(&self, participant: &ParticipantId) -> Option<&IdentityMapping> {
        self.by_participant.get(participant)
    }

    pub fn mappings(&self) -> impl Iterator<Item = &IdentityMapping> {
        self.by_participant.values()
    }

    pub fn unregister_participant(
        &mut self,
        participant: &ParticipantId,
    ) -> Option<IdentityMapping> {
        let mapping = self.by_participant.remove(participant)?;
        self.by_connection.remove(&mapping.connection);
        tracing::debug!(%participant, connection = %mapping.connection, "mapping removed");
        self.notify(participant.clone(), None, false);
        Some(mapping)
    }

    pub fn unregister_connection(
        &mut self,
        connection: ConnectionId,
    ) -> Option<IdentityMapping> {
        let participant = self.by_connection.get(&connection).cloned()?;
        self.unregister_participant(&participant)
    }

    /// Drops every mapping.
    pub fn clear(&mut self) {
        let participants: Vec<ParticipantId> =
            self.by_participant.keys().cloned().collect();
        for participant in participants {
            self.unregister_participant(&participant);
        }
    }

    /// Participants in `session` (other than `local`) with no mapping.
    pub fn unmapped_participants(
        &self,
        session: &Session,
        local: &ParticipantId,
    ) -> Vec<ParticipantId> {
        session
            .participants
            .iter()
            .map(|p| &p.id)
            .filter(|id| *id != local && !self.by_participant.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_participant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_participant.is_empty()
    }

    fn insert(
        &mut self,
        participant: ParticipantId,
        connection: ConnectionId,
        confirmed: bool,
    ) {
        // Evict whatever shares either key so both maps stay one-to-one.
        if let Some(stale) = self.by_participant.get(&participant) {
            if stale.connection != connection {
                self.unregister_participant(&participant);
            }
        }
        if let Some(owner) = self.by_connection.get(&connection).cloned() {
            if owner != participant {
                self.unregister_participant(&owner);
            }
        }

        self.by_connection.insert(connection, participant.clone());
        self.by_participant.insert(
            participant.clone(),
            IdentityMapping {
                participant: participant.clone(),
                connection,
                confirmed,
            },
        );
        tracing::debug!(%participant, %connection, confirmed, "mapping registered");
        self.notify(participant, Some(connection), confirmed);
    }

    fn notify(
        &self,
        participant: ParticipantId,
        connection: Option<ConnectionId>,
        confirmed: bool,
    ) {
        if let Some(bus) = &self.bus {
            bus.emit(LobbyEvent::IdentityMappingChanged {
                participant,
                connection,
                confirmed,
            });
        }
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        assert_eq!(self.by_participant.len(), self.by_connection.len());
        for (participant, mapping) in &self.by_participant {
            assert_eq!(&mapping.participant, participant);
            assert_eq!(
                self.by_connection.get(&mapping.connection),
                Some(participant)
            );
        }
    }
}
