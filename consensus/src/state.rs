//! Replica state machine
//!
//! `ReplicaState` holds everything one replica knows and applies inbound
//! items to it. It performs no I/O: each call returns a [`Step`] listing the
//! messages to send and the events to publish. Messages a replica sends to
//! itself are folded in locally before the call returns, so its own vote
//! counts exactly once, like any other.

use pbftchain_core::{
    GenesisConfig, Hash, PbftError, PbftResult, ReplicaId, Timestamp, View,
};
use pbftchain_ledger::{Block, Ledger, PendingPool, PoolInsert, Transaction};
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::{debug, error, info, warn};

use crate::message::{PeerMessage, Phase, ProtocolMessage};
use crate::proposal::{ProposalKey, ProposalState, ProposalStore};
use crate::quorum::{QuorumCertificate, VoteOutcome};
use crate::replica::{LocalReplica, ReplicaSet};

/// Events emitted on state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusEvent {
    /// This replica proposed a block as leader
    Proposed { view: View, index: u64, hash: Hash },
    PrePrepared { view: View, index: u64, hash: Hash },
    Prepared { view: View, index: u64, hash: Hash },
    /// Block appended to the ledger
    Committed { index: u64, hash: Hash, transactions: usize },
    /// Commit quorum reached ahead of the predecessor
    Deferred { index: u64, hash: Hash },
    /// Proposal dropped by a leader rotation
    Abandoned { view: View, hash: Hash },
    LeaderRotated { view: View, leader: ReplicaId },
    TransactionAccepted { id: String },
}

/// How an accepted inbound item affected the state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    /// Sender already voted for this block in this phase
    DuplicateVote,
    /// Block already decided
    AlreadyCommitted,
    /// Message for a phase or ledger position already passed
    Late,
    /// PrePrepare held until its predecessor is committed
    Parked,
    /// Transaction id already pending or committed
    DuplicateTransaction,
}

/// A message addressed to one peer
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: ReplicaId,
    pub message: PeerMessage,
}

/// Side effects of one handler call
#[derive(Debug)]
pub struct Step {
    pub outcome: Outcome,
    pub outbound: Vec<Outbound>,
    pub events: Vec<ConsensusEvent>,
}

impl Step {
    fn new() -> Self {
        Self {
            outcome: Outcome::Accepted,
            outbound: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Consensus messages in send order, one entry per recipient
    pub fn consensus_messages(&self) -> impl Iterator<Item = (ReplicaId, &ProtocolMessage)> {
        self.outbound.iter().filter_map(|o| match &o.message {
            PeerMessage::Consensus(msg) => Some((o.to, msg)),
            PeerMessage::Transaction(_) => None,
        })
    }

    /// Whether nothing is sent and nothing changed
    pub fn is_quiet(&self) -> bool {
        self.outbound.is_empty() && self.events.is_empty()
    }
}

/// Tunables for a replica
#[derive(Debug, Clone)]
pub struct StateOptions {
    pub max_block_transactions: usize,
    pub pool_capacity: usize,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            max_block_transactions: 100,
            pool_capacity: 10_000,
        }
    }
}

/// All mutable state of one replica
#[derive(Debug)]
pub struct ReplicaState {
    local: LocalReplica,
    replicas: ReplicaSet,
    view: View,
    ledger: Ledger,
    pool: PendingPool,
    proposals: ProposalStore,
    prepares: QuorumCertificate,
    commits: QuorumCertificate,
    /// Decided blocks waiting for their predecessor
    deferred: BTreeMap<u64, Block>,
    /// PrePrepares that arrived ahead of the ledger tail
    parked: BTreeMap<u64, ProtocolMessage>,
    /// Hash of this leader's proposal in the current view
    in_flight: Option<Hash>,
    /// Messages this replica sent to itself
    loopback: VecDeque<ProtocolMessage>,
    max_block_transactions: usize,
}

impl ReplicaState {
    pub fn new(
        local: LocalReplica,
        replicas: ReplicaSet,
        genesis: &GenesisConfig,
        options: StateOptions,
    ) -> PbftResult<Self> {
        if !replicas.contains(local.id()) {
            return Err(PbftError::ConfigError(format!(
                "{} is not a member of the replica set",
                local.id()
            )));
        }
        if let Some(pinned) = replicas.pinned_key(local.id()) {
            if *pinned != local.public_key() {
                return Err(PbftError::ConfigError(format!(
                    "local key does not match the key pinned for {}",
                    local.id()
                )));
            }
        }
        if options.max_block_transactions == 0 {
            return Err(PbftError::ConfigError(
                "max_block_transactions must be positive".into(),
            ));
        }

        Ok(Self {
            local,
            replicas,
            view: View::new(0),
            ledger: Ledger::new(genesis),
            pool: PendingPool::new(options.pool_capacity),
            proposals: ProposalStore::new(),
            prepares: QuorumCertificate::new(),
            commits: QuorumCertificate::new(),
            deferred: BTreeMap::new(),
            parked: BTreeMap::new(),
            in_flight: None,
            loopback: VecDeque::new(),
            max_block_transactions: options.max_block_transactions,
        })
    }

    pub fn id(&self) -> ReplicaId {
        self.local.id()
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Leader of the current view
    pub fn leader(&self) -> ReplicaId {
        self.replicas.leader_for(self.view)
    }

    pub fn is_leader(&self) -> bool {
        self.leader() == self.local.id()
    }

    pub fn replicas(&self) -> &ReplicaSet {
        &self.replicas
    }

    pub fn quorum_size(&self) -> usize {
        self.replicas.quorum_size()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn pool(&self) -> &PendingPool {
        &self.pool
    }

    pub fn proposal_state(&self, view: View, hash: Hash) -> ProposalState {
        self.proposals.state(&ProposalKey::new(view, hash))
    }

    pub fn prepare_votes(&self, hash: &Hash) -> usize {
        self.prepares.count(hash)
    }

    pub fn commit_votes(&self, hash: &Hash) -> usize {
        self.commits.count(hash)
    }

    pub fn in_flight(&self) -> Option<Hash> {
        self.in_flight
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    /// Accept a transaction from a client and forward it to every peer
    pub fn submit_transaction(&mut self, tx: Transaction) -> PbftResult<Step> {
        self.accept_transaction(tx, true)
    }

    /// Accept a transaction forwarded by a peer
    pub fn receive_transaction(&mut self, tx: Transaction) -> PbftResult<Step> {
        self.accept_transaction(tx, false)
    }

    /// Apply one protocol message
    pub fn handle_message(&mut self, msg: ProtocolMessage) -> PbftResult<Step> {
        let mut step = Step::new();
        let result = self.apply(msg, &mut step);
        self.drain_loopback(&mut step);
        step.outcome = result?;
        Ok(step)
    }

    /// Apply any peer message
    pub fn handle_peer_message(&mut self, msg: PeerMessage) -> PbftResult<Step> {
        match msg {
            PeerMessage::Consensus(msg) => self.handle_message(msg),
            PeerMessage::Transaction(tx) => self.receive_transaction(tx),
        }
    }

    /// Propose a block if this replica leads and has work
    pub fn propose(&mut self) -> Step {
        let mut step = Step::new();
        self.try_propose(&mut step);
        self.drain_loopback(&mut step);
        step
    }

    /// Advance to the next view. Every uncommitted proposal of the old view
    /// is abandoned and both certificates start over.
    pub fn rotate_leader(&mut self) -> Step {
        let mut step = Step::new();
        let old = self.view;
        self.view = old.next();

        let abandoned = self.proposals.abandon_view(old);
        if !abandoned.is_empty() {
            info!("{} abandoned {} proposal(s) from {}", self.id(), abandoned.len(), old);
        }
        for hash in abandoned {
            step.events.push(ConsensusEvent::Abandoned { view: old, hash });
        }

        self.prepares.clear();
        self.commits.clear();
        self.in_flight = None;
        self.parked.clear();
        self.loopback.clear();

        let leader = self.leader();
        info!("{} rotated to {}, leader is {}", self.id(), self.view, leader);
        step.events.push(ConsensusEvent::LeaderRotated {
            view: self.view,
            leader,
        });

        self.try_propose(&mut step);
        self.drain_loopback(&mut step);
        step
    }

    fn accept_transaction(&mut self, tx: Transaction, forward: bool) -> PbftResult<Step> {
        tx.validate()?;

        let mut step = Step::new();
        if self.ledger.contains_transaction(&tx.id) {
            debug!("Transaction {} already committed", tx.id);
            step.outcome = Outcome::DuplicateTransaction;
            return Ok(step);
        }

        let id = tx.id.clone();
        let forwarded = forward.then(|| tx.clone());
        match self.pool.add(tx) {
            PoolInsert::Added => {}
            PoolInsert::Duplicate => {
                debug!("Transaction {} already pending", id);
                step.outcome = Outcome::DuplicateTransaction;
                return Ok(step);
            }
            PoolInsert::Full => {
                return Err(PbftError::InvalidTransaction("pending pool is full".into()));
            }
        }

        debug!("{} accepted transaction {}", self.id(), id);
        step.events.push(ConsensusEvent::TransactionAccepted { id });

        if let Some(tx) = forwarded {
            let me = self.local.id();
            for peer in self.replicas.peers_of(me) {
                step.outbound.push(Outbound {
                    to: peer,
                    message: PeerMessage::Transaction(tx.clone()),
                });
            }
        }

        self.try_propose(&mut step);
        self.drain_loopback(&mut step);
        Ok(step)
    }

    fn apply(&mut self, msg: ProtocolMessage, step: &mut Step) -> PbftResult<Outcome> {
        self.replicas.authenticate(&msg)?;
        msg.block.verify_hash()?;

        let hash = msg.block_hash();
        if self.proposals.is_decided(&hash) || self.ledger.contains(&hash) {
            debug!("{} for decided block {} ignored", msg.phase, hash);
            return Ok(Outcome::AlreadyCommitted);
        }
        // Nothing is voted for at an index already filled; together with the
        // commit lock this keeps one Commit hash per index per replica
        if msg.block.index <= self.ledger.tail().index {
            debug!("{} for filled index {} ignored", msg.phase, msg.block.index);
            return Ok(Outcome::Late);
        }

        if msg.view != self.view {
            return Err(PbftError::StaleView {
                current: self.view,
                got: msg.view,
            });
        }

        // Every block in a view must come from that view's leader, so all
        // accepted bodies with one hash are identical
        let leader = self.leader();
        if msg.block.proposer != leader {
            return Err(PbftError::WrongLeader {
                view: msg.view,
                expected: leader,
                got: msg.block.proposer,
            });
        }

        match msg.phase {
            Phase::PrePrepare => self.on_pre_prepare(msg, step),
            Phase::Prepare => self.on_prepare(msg, step),
            Phase::Commit => self.on_commit(msg, step),
        }
    }

    fn on_pre_prepare(&mut self, msg: ProtocolMessage, step: &mut Step) -> PbftResult<Outcome> {
        let leader = self.leader();
        if msg.sender != leader {
            return Err(PbftError::WrongLeader {
                view: msg.view,
                expected: leader,
                got: msg.sender,
            });
        }

        let hash = msg.block_hash();
        let key = ProposalKey::new(msg.view, hash);
        if self.proposals.state(&key) != ProposalState::Idle {
            debug!("Duplicate PrePrepare for {} from {}", hash, msg.sender);
            return Ok(Outcome::DuplicateVote);
        }

        let tail = self.ledger.tail();
        if msg.block.index > tail.index + 1 {
            debug!(
                "Parking PrePrepare for index {} until index {} lands",
                msg.block.index,
                tail.index + 1
            );
            self.parked.entry(msg.block.index).or_insert(msg);
            return Ok(Outcome::Parked);
        }
        if msg.block.index != tail.index + 1 || msg.block.prev_hash != tail.hash {
            return Err(PbftError::ChainIntegrityViolation(format!(
                "proposal {} at index {} does not extend tail {} at index {}",
                hash, msg.block.index, tail.hash, tail.index
            )));
        }

        let mut ids = HashSet::with_capacity(msg.block.transactions.len());
        for tx in &msg.block.transactions {
            tx.validate()?;
            if !ids.insert(tx.id.as_str()) {
                return Err(PbftError::InvalidTransaction(format!(
                    "duplicate transaction {} in block",
                    tx.id
                )));
            }
            if self.ledger.contains_transaction(&tx.id) {
                return Err(PbftError::InvalidTransaction(format!(
                    "transaction {} already committed",
                    tx.id
                )));
            }
        }

        self.check_conflicts(msg.view, &msg.block)?;

        self.proposals.record(msg.view, &msg.block).state = ProposalState::PrePrepared;
        self.proposals.mark_prepared(msg.view, msg.block.index, hash);

        info!(
            "{} pre-prepared block {} ({}) in {}",
            self.id(),
            msg.block.index,
            hash,
            msg.view
        );
        step.events.push(ConsensusEvent::PrePrepared {
            view: msg.view,
            index: msg.block.index,
            hash,
        });

        let prepare = self.local.message(Phase::Prepare, msg.view, msg.block);
        self.broadcast(prepare, step);
        Ok(Outcome::Accepted)
    }

    fn on_prepare(&mut self, msg: ProtocolMessage, step: &mut Step) -> PbftResult<Outcome> {
        let hash = msg.block_hash();
        let key = ProposalKey::new(msg.view, hash);
        if self.proposals.state(&key).is_prepared() {
            debug!("Late Prepare for {} from {}", hash, msg.sender);
            return Ok(Outcome::Late);
        }

        let count = match self.prepares.add_vote(hash, msg.sender) {
            VoteOutcome::Counted(count) => count,
            VoteOutcome::Duplicate => {
                debug!("Duplicate Prepare for {} from {}", hash, msg.sender);
                return Ok(Outcome::DuplicateVote);
            }
        };
        self.proposals.record(msg.view, &msg.block);

        let quorum = self.quorum_size();
        debug!("Prepare for {} from {} ({}/{})", hash, msg.sender, count, quorum);
        if count < quorum {
            return Ok(Outcome::Accepted);
        }

        if let Some(locked) = self.proposals.lock_at(msg.block.index) {
            if locked.hash != hash {
                warn!(
                    "Prepare quorum for {} at index {} conflicts with commit lock on {}",
                    hash, msg.block.index, locked.hash
                );
                return Ok(Outcome::Accepted);
            }
        }

        self.proposals.set_state(&key, ProposalState::Prepared);
        self.proposals.lock(&msg.block);
        self.prepares.discard(&hash);

        info!(
            "{} prepared block {} ({}) in {}",
            self.id(),
            msg.block.index,
            hash,
            msg.view
        );
        step.events.push(ConsensusEvent::Prepared {
            view: msg.view,
            index: msg.block.index,
            hash,
        });

        let commit = self.local.message(Phase::Commit, msg.view, msg.block);
        self.broadcast(commit, step);
        Ok(Outcome::Accepted)
    }

    fn on_commit(&mut self, msg: ProtocolMessage, step: &mut Step) -> PbftResult<Outcome> {
        let hash = msg.block_hash();
        let count = match self.commits.add_vote(hash, msg.sender) {
            VoteOutcome::Counted(count) => count,
            VoteOutcome::Duplicate => {
                debug!("Duplicate Commit for {} from {}", hash, msg.sender);
                return Ok(Outcome::DuplicateVote);
            }
        };
        self.proposals.record(msg.view, &msg.block);

        let quorum = self.quorum_size();
        debug!("Commit for {} from {} ({}/{})", hash, msg.sender, count, quorum);
        if count < quorum {
            return Ok(Outcome::Accepted);
        }

        self.proposals
            .mark_decided(&ProposalKey::new(msg.view, hash), msg.block.index);
        self.prepares.discard(&hash);
        self.commits.discard(&hash);
        if self.in_flight == Some(hash) {
            self.in_flight = None;
        }

        info!(
            "{} reached commit quorum for block {} ({})",
            self.id(),
            msg.block.index,
            hash
        );

        self.commit_block(msg.block, step);
        self.try_propose(step);
        Ok(Outcome::Accepted)
    }

    /// Append a decided block, or defer it until its predecessor lands
    fn commit_block(&mut self, block: Block, step: &mut Step) {
        let tail = self.ledger.tail();
        let (tail_index, tail_hash) = (tail.index, tail.hash);

        if block.index <= tail_index {
            warn!(
                "Dropping decided block {} ({}): index already filled",
                block.index, block.hash
            );
            return;
        }
        if block.index > tail_index + 1 {
            info!(
                "{} deferring block {} ({}) until index {} lands",
                self.id(),
                block.index,
                block.hash,
                tail_index + 1
            );
            step.events.push(ConsensusEvent::Deferred {
                index: block.index,
                hash: block.hash,
            });
            self.deferred.entry(block.index).or_insert(block);
            return;
        }
        if block.prev_hash != tail_hash {
            error!(
                "Decided block {} links to {}, tail is {}; not appending",
                block.index, block.prev_hash, tail_hash
            );
            return;
        }

        self.append(block, step);

        loop {
            let tail = self.ledger.tail();
            let next_index = tail.index + 1;
            let tail_hash = tail.hash;
            let Some(next) = self.deferred.remove(&next_index) else {
                break;
            };
            if next.prev_hash != tail_hash {
                warn!(
                    "Dropping deferred block {} ({}): does not extend tail",
                    next.index, next.hash
                );
                break;
            }
            self.append(next, step);
        }

        let tail_index = self.ledger.tail().index;
        self.deferred.retain(|index, _| *index > tail_index);
    }

    fn append(&mut self, block: Block, step: &mut Step) {
        let (index, hash, transactions) = (block.index, block.hash, block.transactions.len());
        if let Err(e) = self.ledger.append(block) {
            error!("Failed to append block {} ({}): {}", index, hash, e);
            return;
        }

        let removed = self.pool.remove_committed(self.ledger.tail());
        self.proposals.release_locks_through(index);
        self.proposals.prune_decided_through(index);

        if let Some(parked) = self.parked.remove(&(index + 1)) {
            self.loopback.push_back(parked);
        }
        self.parked.retain(|i, _| *i > index);

        info!(
            "{} committed block {} ({}) with {} transaction(s), {} removed from pool",
            self.id(),
            index,
            hash,
            transactions,
            removed
        );
        step.events.push(ConsensusEvent::Committed {
            index,
            hash,
            transactions,
        });
    }

    fn check_conflicts(&self, view: View, block: &Block) -> PbftResult<()> {
        if let Some(existing) = self.proposals.prepared_at(view, block.index) {
            if existing != block.hash {
                return Err(PbftError::ConflictingProposal {
                    index: block.index,
                    existing,
                });
            }
        }
        if let Some(locked) = self.proposals.lock_at(block.index) {
            if locked.hash != block.hash {
                return Err(PbftError::ConflictingProposal {
                    index: block.index,
                    existing: locked.hash,
                });
            }
        }
        Ok(())
    }

    fn try_propose(&mut self, step: &mut Step) {
        if !self.is_leader() || self.in_flight.is_some() || !self.deferred.is_empty() {
            return;
        }

        let tail = self.ledger.tail();
        let me = self.local.id();
        let block = match self.proposals.lock_at(tail.index + 1) {
            // Locked on a block nobody has committed yet: offer it again.
            // The proposer is not hashed, so the hash is unchanged.
            Some(locked) if locked.prev_hash == tail.hash => Block {
                proposer: me,
                ..locked.clone()
            },
            _ => {
                if self.pool.is_empty() {
                    return;
                }
                let transactions = self.pool.peek(self.max_block_transactions);
                Block::child_of(tail, Timestamp::now(), transactions, me)
            }
        };

        self.in_flight = Some(block.hash);
        info!(
            "{} proposing block {} ({}) with {} transaction(s) in {}",
            me,
            block.index,
            block.hash,
            block.transactions.len(),
            self.view
        );
        step.events.push(ConsensusEvent::Proposed {
            view: self.view,
            index: block.index,
            hash: block.hash,
        });

        let pre_prepare = self.local.message(Phase::PrePrepare, self.view, block);
        self.broadcast(pre_prepare, step);
    }

    /// Send a message to every peer and queue it for local processing
    fn broadcast(&mut self, msg: ProtocolMessage, step: &mut Step) {
        let me = self.local.id();
        for peer in self.replicas.peers_of(me) {
            step.outbound.push(Outbound {
                to: peer,
                message: PeerMessage::Consensus(msg.clone()),
            });
        }
        self.loopback.push_back(msg);
    }

    /// Apply own messages and unparked PrePrepares
    fn drain_loopback(&mut self, step: &mut Step) {
        while let Some(msg) = self.loopback.pop_front() {
            let (phase, index, sender) = (msg.phase, msg.block.index, msg.sender);
            if let Err(e) = self.apply(msg, step) {
                warn!(
                    "{} rejected queued {} for index {} from {}: {}",
                    self.id(),
                    phase,
                    index,
                    sender,
                    e
                );
            }
        }
    }
}
