//! Pending-transaction pool
//!
//! Lives inside the replica state and is guarded by the replica lock, so it
//! carries no locking of its own.

use pbftchain_core::Timestamp;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

use crate::block::Block;
use crate::transaction::Transaction;

/// Result of offering a transaction to the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolInsert {
    Added,
    /// Same id already pending
    Duplicate,
    /// Pool at capacity
    Full,
}

/// Pool entry with metadata
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub tx: Transaction,
    pub received_at: Timestamp,
}

/// Unconfirmed transactions in arrival order, deduplicated by id
#[derive(Debug)]
pub struct PendingPool {
    order: VecDeque<String>,
    entries: HashMap<String, PoolEntry>,
    max_size: usize,
}

impl PendingPool {
    pub fn new(max_size: usize) -> Self {
        Self {
            order: VecDeque::new(),
            entries: HashMap::new(),
            max_size,
        }
    }

    /// Add a transaction at the back of the queue
    pub fn add(&mut self, tx: Transaction) -> PoolInsert {
        if self.entries.contains_key(&tx.id) {
            return PoolInsert::Duplicate;
        }
        if self.entries.len() >= self.max_size {
            warn!("Pending pool full, transaction {} rejected", tx.id);
            return PoolInsert::Full;
        }

        debug!("Added transaction {} to pending pool", tx.id);

        self.order.push_back(tx.id.clone());
        self.entries.insert(
            tx.id.clone(),
            PoolEntry {
                tx,
                received_at: Timestamp::now(),
            },
        );
        PoolInsert::Added
    }

    /// Oldest `limit` transactions, left in the pool
    pub fn peek(&self, limit: usize) -> Vec<Transaction> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .take(limit)
            .map(|e| e.tx.clone())
            .collect()
    }

    /// Remove a transaction by id
    pub fn remove(&mut self, tx_id: &str) -> Option<PoolEntry> {
        let entry = self.entries.remove(tx_id)?;
        self.order.retain(|id| id != tx_id);
        Some(entry)
    }

    /// Drop every transaction included in a committed block
    pub fn remove_committed(&mut self, block: &Block) -> usize {
        let before = self.entries.len();
        for tx in &block.transactions {
            self.entries.remove(&tx.id);
        }
        let entries = &self.entries;
        self.order.retain(|id| entries.contains_key(id));
        before - self.entries.len()
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.entries.contains_key(tx_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending ids in arrival order
    pub fn ids(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }
}

impl Default for PendingPool {
    fn default() -> Self {
        Self::new(10_000)
    }
}
