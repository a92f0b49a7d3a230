//! An in-process [`RelayService`] with scriptable failures.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use lobbyforge_protocol::RelayEndpoint;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;

use crate::{Allocation, JoinedAllocation, RelayError, RelayService};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

/// Names each relay operation for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayOp {
    Allocate,
    GetJoinCode,
    Join,
}

struct Record {
    allocation: Allocation,
    join_code: Option<String>,
    joined: u32,
}

#[derive(Default)]
struct State {
    next_id: u64,
    allocations: HashMap<String, Record>,
    /// Join code → allocation id.
    codes: HashMap<String, String>,
    /// Codes handed out in order instead of random ones.
    scripted_codes: VecDeque<String>,
    faults: HashMap<RelayOp, VecDeque<RelayError>>,
    hung: HashSet<RelayOp>,
    calls: HashMap<RelayOp, usize>,
}

/// A relay service held in memory.
#[derive(Default)]
pub struct MemoryRelay {
    state: Mutex<State>,
    unhung: Notify,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next allocation gets `code` as its join code.
    pub fn script_join_code(&self, code: impl Into<String>) {
        self.state.lock().scripted_codes.push_back(code.into());
    }

    pub fn fail_next(&self, op: RelayOp, error: RelayError) {
        self.state
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(error);
    }

    pub fn hang(&self, op: RelayOp) {
        self.state.lock().hung.insert(op);
    }

    /// Releases calls of `op` already pending, too.
    pub fn unhang(&self, op: RelayOp) {
        self.state.lock().hung.remove(&op);
        self.unhung.notify_waiters();
    }

    pub fn calls(&self, op: RelayOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn allocation_count(&self) -> usize {
        self.state.lock().allocations.len()
    }

    /// Drops an allocation, as if the relay had expired it.
    pub fn expire_allocation(&self, allocation_id: &str) {
        let mut state = self.state.lock();
        if let Some(record) = state.allocations.remove(allocation_id) {
            if let Some(code) = record.join_code {
                state.codes.remove(&code);
            }
        }
    }

    fn enter(&self, op: RelayOp) -> Result<bool, RelayError> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(error) = state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(state.hung.contains(&op))
    }

    async fn begin(&self, op: RelayOp) -> Result<(), RelayError> {
        if !self.enter(op)? {
            return Ok(());
        }
        loop {
            let unhung = self.unhung.notified();
            if !self.state.lock().hung.contains(&op) {
                return Ok(());
            }
            unhung.await;
        }
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    (0..len).map(|_| rng.random()).collect()
}

fn endpoint() -> RelayEndpoint {
    RelayEndpoint {
        host: "relay.memory".into(),
        port: 7777,
        secure: true,
    }
}

#[async_trait]
impl RelayService for MemoryRelay {
    async fn create_allocation(
        &self,
        max_connections: u32,
    ) -> Result<Allocation, RelayError> {
        self.begin(RelayOp::Allocate).await?;

        let mut state = self.state.lock();
        state.next_id += 1;
        let allocation = Allocation {
            allocation_id: format!("alloc-{:04}", state.next_id),
            endpoint: endpoint(),
            connection_data: random_bytes(16),
            key: random_bytes(32),
            max_connections,
        };
        state.allocations.insert(
            allocation.allocation_id.clone(),
            Record {
                allocation: allocation.clone(),
                join_code: None,
                joined: 0,
            },
        );
        Ok(allocation)
    }

    async fn get_join_code(
        &self,
        allocation_id: &str,
    ) -> Result<String, RelayError> {
        self.begin(RelayOp::GetJoinCode).await?;

        let mut state = self.state.lock();
        let existing = state
            .allocations
            .get(allocation_id)
            .ok_or_else(|| RelayError::NotFound(allocation_id.to_string()))?
            .join_code
            .clone();
        if let Some(code) = existing {
            return Ok(code);
        }

        let code = match state.scripted_codes.pop_front() {
            Some(code) => code,
            None => loop {
                let mut rng = rand::rng();
                let code: String = (0..CODE_LEN)
                    .map(|_| {
                        CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]
                            as char
                    })
                    .collect();
                if !state.codes.contains_key(&code) {
                    break code;
                }
            },
        };
        state.codes.insert(code.clone(), allocation_id.to_string());
        if let Some(record) = state.allocations.get_mut(allocation_id) {
            record.join_code = Some(code.clone());
        }
        Ok(code)
    }

    async fn join_allocation(
        &self,
        join_code: &str,
    ) -> Result<JoinedAllocation, RelayError> {
        self.begin(RelayOp::Join).await?;

        let mut state = self.state.lock();
        let allocation_id = state
            .codes
            .get(join_code)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(join_code.to_string()))?;
        let record = state
            .allocations
            .get_mut(&allocation_id)
            .ok_or_else(|| RelayError::NotFound(join_code.to_string()))?;
        if record.joined >= record.allocation.max_connections {
            return Err(RelayError::Full(allocation_id));
        }
        record.joined += 1;

        Ok(JoinedAllocation {
            allocation_id,
            endpoint: record.allocation.endpoint.clone(),
            connection_data: random_bytes(16),
            host_connection_data: record.allocation.connection_data.clone(),
            key: record.allocation.key.clone(),
        })
    }
}
