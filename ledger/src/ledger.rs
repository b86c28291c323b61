//! Append-only, hash-chained ledger of committed blocks

use pbftchain_core::{GenesisConfig, Hash, PbftError, PbftResult};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::block::{genesis_block, Block};

/// Committed blocks in order, starting at genesis.
///
/// Invariant: `blocks[i].index == i` and `blocks[i].prev_hash == blocks[i-1].hash`.
#[derive(Debug, Clone)]
pub struct Ledger {
    blocks: Vec<Block>,
    by_hash: HashMap<Hash, u64>,
    tx_ids: HashSet<String>,
}

impl Ledger {
    /// Create a ledger holding only the genesis block
    pub fn new(genesis: &GenesisConfig) -> Self {
        let genesis = genesis_block(genesis);
        info!("Ledger initialized, genesis {}", genesis.hash);

        let mut by_hash = HashMap::new();
        by_hash.insert(genesis.hash, 0);

        Self {
            blocks: vec![genesis],
            by_hash,
            tx_ids: HashSet::new(),
        }
    }

    /// Append a block. Fails without touching the ledger unless the block
    /// directly extends the current tail.
    pub fn append(&mut self, block: Block) -> PbftResult<()> {
        let tail = self.tail();

        if block.index != tail.index + 1 {
            return Err(PbftError::ChainIntegrityViolation(format!(
                "expected index {}, got {}",
                tail.index + 1,
                block.index
            )));
        }
        if block.prev_hash != tail.hash {
            return Err(PbftError::ChainIntegrityViolation(format!(
                "block {} links to {}, tail is {}",
                block.index, block.prev_hash, tail.hash
            )));
        }
        block.verify_hash()?;

        debug!("Appending block {} ({})", block.index, block.hash);

        self.by_hash.insert(block.hash, block.index);
        self.tx_ids
            .extend(block.transactions.iter().map(|tx| tx.id.clone()));
        self.blocks.push(block);
        Ok(())
    }

    /// The most recently appended block
    pub fn tail(&self) -> &Block {
        // Never empty: genesis is inserted on construction
        &self.blocks[self.blocks.len() - 1]
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false; a ledger holds at least its genesis block
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Whether a block with this content hash has been committed
    pub fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Whether a transaction with this id has been committed
    pub fn contains_transaction(&self, tx_id: &str) -> bool {
        self.tx_ids.contains(tx_id)
    }

    /// Index of the block holding a committed transaction
    pub fn find_transaction(&self, tx_id: &str) -> Option<u64> {
        if !self.contains_transaction(tx_id) {
            return None;
        }
        self.blocks
            .iter()
            .find(|b| b.contains_transaction(tx_id))
            .map(|b| b.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;
    use pbftchain_core::{ReplicaId, Timestamp};
    use pbftchain_crypto::keys::KeyPair;

    fn ledger() -> Ledger {
        Ledger::new(&GenesisConfig::default())
    }

    fn next_block(ledger: &Ledger, tx_id: &str) -> Block {
        let kp = KeyPair::generate();
        let tx = Transaction::new(tx_id, "Alice", "Bob", 10, &kp);
        Block::child_of(ledger.tail(), Timestamp::now(), vec![tx], ReplicaId(1))
    }

    #[test]
    fn test_append_extends_tail() {
        let mut ledger = ledger();
        let block = next_block(&ledger, "1");
        let hash = block.hash;

        ledger.append(block).unwrap();

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.tail().hash, hash);
        assert!(ledger.contains(&hash));
        assert_eq!(ledger.find_transaction("1"), Some(1));
    }

    #[test]
    fn test_wrong_index_leaves_ledger_unchanged() {
        let mut ledger = ledger();
        let mut block = next_block(&ledger, "1");
        block.index = 2;
        let before = ledger.blocks().to_vec();

        assert!(matches!(
            ledger.append(block),
            Err(PbftError::ChainIntegrityViolation(_))
        ));
        assert_eq!(ledger.blocks(), before.as_slice());
    }

    #[test]
    fn test_wrong_prev_hash_rejected() {
        let mut ledger = ledger();
        let genesis = ledger.tail().clone();
        let b1 = next_block(&ledger, "1");
        ledger.append(b1).unwrap();

        // Also index 2 but chained to genesis
        let fork = Block::new(2, genesis.hash, Timestamp::now(), vec![], ReplicaId(2));
        assert!(ledger.append(fork).is_err());
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_duplicate_append_rejected() {
        let mut ledger = ledger();
        let block = next_block(&ledger, "1");
        ledger.append(block.clone()).unwrap();
        assert!(ledger.append(block).is_err());
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_forged_hash_rejected() {
        let mut ledger = ledger();
        let mut block = next_block(&ledger, "1");
        block.transactions[0].amount = 99;
        assert!(matches!(
            ledger.append(block),
            Err(PbftError::BlockHashMismatch { .. })
        ));
        assert_eq!(ledger.len(), 1);
    }
}
