//! Snapshot diffing.

use std::collections::HashMap;

use lobbyforge_protocol::{LobbyEvent, Participant, ParticipantId, SessionId};

/// Compares two participant lists and returns the membership events
/// that turn `old` into `new`.
///
/// Order: every `ParticipantLeft` (in `old` order), then every
/// `ParticipantJoined` (in `new` order), then every `ParticipantUpdated`
/// for participants present in both whose data bag changed. Unchanged
/// participants produce nothing.
pub fn diff_participants(
    session_id: &SessionId,
    old: &[Participant],
    new: &[Participant],
) -> Vec<LobbyEvent> {
    let before: HashMap<&ParticipantId, &Participant> =
        old.iter().map(|p| (&p.id, p)).collect();
    let after: HashMap<&ParticipantId, &Participant> =
        new.iter().map(|p| (&p.id, p)).collect();

    let left = old
        .iter()
        .filter(|p| !after.contains_key(&p.id))
        .map(|p| LobbyEvent::ParticipantLeft {
            session_id: session_id.clone(),
            participant: p.clone(),
        });

    let joined = new
        .iter()
        .filter(|p| !before.contains_key(&p.id))
        .map(|p| LobbyEvent::ParticipantJoined {
            session_id: session_id.clone(),
            participant: p.clone(),
        });

    let updated = new.iter().filter_map(|current| {
        let previous = before.get(&current.id)?;
        (previous.data != current.data).then(|| LobbyEvent::ParticipantUpdated {
            session_id: session_id.clone(),
            previous: (*previous).clone(),
            current: current.clone(),
        })
    });

    left.chain(joined).chain(updated).collect()
}
