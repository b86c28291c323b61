//! Quorum certificates keyed by block content hash

use pbftchain_core::{Hash, ReplicaId};
use std::collections::{HashMap, HashSet};

/// Result of folding a vote into a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// New voter; carries the distinct-voter count afterwards
    Counted(usize),
    /// Sender already voted for this hash
    Duplicate,
}

/// Distinct voters per block hash for one phase
#[derive(Debug, Default)]
pub struct QuorumCertificate {
    votes: HashMap<Hash, HashSet<ReplicaId>>,
}

impl QuorumCertificate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vote; a sender counts at most once per hash
    pub fn add_vote(&mut self, hash: Hash, voter: ReplicaId) -> VoteOutcome {
        let voters = self.votes.entry(hash).or_default();
        if !voters.insert(voter) {
            return VoteOutcome::Duplicate;
        }
        VoteOutcome::Counted(voters.len())
    }

    /// Distinct voters for a hash
    pub fn count(&self, hash: &Hash) -> usize {
        self.votes.get(hash).map(|v| v.len()).unwrap_or(0)
    }

    pub fn has_voted(&self, hash: &Hash, voter: ReplicaId) -> bool {
        self.votes
            .get(hash)
            .map(|v| v.contains(&voter))
            .unwrap_or(false)
    }

    /// Whether `quorum` distinct replicas voted for the hash
    pub fn is_reached(&self, hash: &Hash, quorum: usize) -> bool {
        self.count(hash) >= quorum
    }

    /// Voters for a hash, sorted
    pub fn voters(&self, hash: &Hash) -> Vec<ReplicaId> {
        let mut voters: Vec<ReplicaId> = self
            .votes
            .get(hash)
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default();
        voters.sort();
        voters
    }

    /// Drop the certificate for one hash
    pub fn discard(&mut self, hash: &Hash) {
        self.votes.remove(hash);
    }

    /// Drop every certificate
    pub fn clear(&mut self) {
        self.votes.clear();
    }

    /// Number of hashes with at least one vote
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}
