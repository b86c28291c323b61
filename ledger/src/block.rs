//! Blocks and the genesis block

use pbftchain_core::{
    GenesisConfig, Hash, Hashable, PbftError, PbftResult, ReplicaId, Timestamp,
};
use pbftchain_crypto::hashing::IncrementalHasher;
use serde::{Deserialize, Serialize};

use crate::transaction::Transaction;

/// An ordered batch of transactions, chained to its predecessor by hash.
///
/// Immutable once proposed; `hash` always equals
/// `H(index, prev_hash, timestamp, serialize(transactions))`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: Timestamp,
    pub transactions: Vec<Transaction>,
    pub hash: Hash,
    pub prev_hash: Hash,
    /// Replica that proposed the block
    pub proposer: ReplicaId,
}

impl Block {
    /// Build a block and compute its content hash
    pub fn new(
        index: u64,
        prev_hash: Hash,
        timestamp: Timestamp,
        transactions: Vec<Transaction>,
        proposer: ReplicaId,
    ) -> Self {
        let hash = Self::compute_hash(index, &prev_hash, timestamp, &transactions);
        Self {
            index,
            timestamp,
            transactions,
            hash,
            prev_hash,
            proposer,
        }
    }

    /// Build the block that follows `parent`
    pub fn child_of(
        parent: &Block,
        timestamp: Timestamp,
        transactions: Vec<Transaction>,
        proposer: ReplicaId,
    ) -> Self {
        Self::new(parent.index + 1, parent.hash, timestamp, transactions, proposer)
    }

    /// Content hash over index, previous hash, timestamp and transactions
    pub fn compute_hash(
        index: u64,
        prev_hash: &Hash,
        timestamp: Timestamp,
        transactions: &[Transaction],
    ) -> Hash {
        // Vec<Transaction> of plain fields cannot fail to serialize
        let tx_bytes = bincode::serialize(transactions).unwrap_or_default();

        let mut hasher = IncrementalHasher::new();
        hasher.update(&index.to_le_bytes());
        hasher.update(prev_hash.as_bytes());
        hasher.update(&timestamp.0.to_le_bytes());
        hasher.update(&tx_bytes);
        hasher.finalize()
    }

    /// Check that the claimed hash matches the block contents
    pub fn verify_hash(&self) -> PbftResult<()> {
        let computed = Self::compute_hash(
            self.index,
            &self.prev_hash,
            self.timestamp,
            &self.transactions,
        );
        if computed != self.hash {
            return Err(PbftError::BlockHashMismatch {
                claimed: self.hash,
                computed,
            });
        }
        Ok(())
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.prev_hash.is_zero()
    }

    pub fn contains_transaction(&self, tx_id: &str) -> bool {
        self.transactions.iter().any(|tx| tx.id == tx_id)
    }
}

impl Hashable for Block {
    fn hash(&self) -> Hash {
        self.hash
    }
}

/// Build the genesis block. Identical configs yield identical blocks.
pub fn genesis_block(config: &GenesisConfig) -> Block {
    Block::new(
        0,
        Hash::ZERO,
        Timestamp::from_millis(config.timestamp),
        vec![],
        ReplicaId::new(0),
    )
}
