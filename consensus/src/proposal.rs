//! Proposal records: one authoritative phase state per (view, block hash)

use pbftchain_core::{Hash, View};
use pbftchain_ledger::Block;
use std::collections::{BTreeMap, HashMap};

/// Phase progress of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalState {
    /// Seen only through votes
    Idle,
    /// Accepted a PrePrepare and sent Prepare
    PrePrepared,
    /// Prepare quorum reached and Commit sent
    Prepared,
    /// Commit quorum reached
    Committed,
    /// Leader rotated before the proposal committed
    Abandoned,
}

impl ProposalState {
    /// Whether the Prepare phase is behind us
    pub fn is_prepared(&self) -> bool {
        matches!(self, ProposalState::Prepared | ProposalState::Committed)
    }
}

/// Identity of a proposal record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProposalKey {
    pub view: View,
    pub hash: Hash,
}

impl ProposalKey {
    pub fn new(view: View, hash: Hash) -> Self {
        Self { view, hash }
    }
}

/// Tracked proposal
#[derive(Debug, Clone)]
pub struct ProposalRecord {
    pub view: View,
    pub block: Block,
    pub state: ProposalState,
}

impl ProposalRecord {
    pub fn new(view: View, block: Block) -> Self {
        Self {
            view,
            block,
            state: ProposalState::Idle,
        }
    }
}

/// Proposal store
#[derive(Debug, Default)]
pub struct ProposalStore {
    records: HashMap<ProposalKey, ProposalRecord>,
    /// Index of each hash that reached Commit quorum and is not yet below
    /// the ledger tail
    decided: HashMap<Hash, u64>,
    /// Hash this replica sent a Prepare for, per (view, index)
    prepared: HashMap<(View, u64), Hash>,
    /// Block this replica sent a Commit for, per index; held until the index
    /// is filled in the ledger
    locks: BTreeMap<u64, Block>,
}

impl ProposalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, `Idle` when untracked
    pub fn state(&self, key: &ProposalKey) -> ProposalState {
        self.records
            .get(key)
            .map(|r| r.state)
            .unwrap_or(ProposalState::Idle)
    }

    /// Get or create the record for `block` in `view`
    pub fn record(&mut self, view: View, block: &Block) -> &mut ProposalRecord {
        self.records
            .entry(ProposalKey::new(view, block.hash))
            .or_insert_with(|| ProposalRecord::new(view, block.clone()))
    }

    pub fn set_state(&mut self, key: &ProposalKey, state: ProposalState) {
        if let Some(record) = self.records.get_mut(key) {
            record.state = state;
        }
    }

    pub fn is_decided(&self, hash: &Hash) -> bool {
        self.decided.contains_key(hash)
    }

    pub fn mark_decided(&mut self, key: &ProposalKey, index: u64) {
        self.set_state(key, ProposalState::Committed);
        self.decided.insert(key.hash, index);
    }

    /// Forget decisions at or below `index`; the ledger answers for them
    pub fn prune_decided_through(&mut self, index: u64) {
        self.decided.retain(|_, decided_at| *decided_at > index);
    }

    /// Hash already prepared at `index` in `view`
    pub fn prepared_at(&self, view: View, index: u64) -> Option<Hash> {
        self.prepared.get(&(view, index)).copied()
    }

    pub fn mark_prepared(&mut self, view: View, index: u64, hash: Hash) {
        self.prepared.insert((view, index), hash);
    }

    /// Block this replica is committed to at `index`
    pub fn lock_at(&self, index: u64) -> Option<&Block> {
        self.locks.get(&index)
    }

    pub fn lock(&mut self, block: &Block) {
        self.locks.entry(block.index).or_insert_with(|| block.clone());
    }

    /// Release every lock at or below `index`
    pub fn release_locks_through(&mut self, index: u64) {
        self.locks = self.locks.split_off(&(index + 1));
    }

    /// Retire every record from `view` and earlier. Returns the hashes of
    /// records that never committed.
    pub fn abandon_view(&mut self, view: View) -> Vec<Hash> {
        let mut abandoned = Vec::new();
        self.records.retain(|key, record| {
            if key.view > view {
                return true;
            }
            if record.state != ProposalState::Committed {
                record.state = ProposalState::Abandoned;
                abandoned.push(key.hash);
            }
            false
        });
        self.prepared.retain(|(v, _), _| *v > view);
        abandoned
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
