//! PBFTCHAIN Ledger
//! 
//! Everything that outlives a single consensus round:
//! - Signed client transactions
//! - Hash-chained blocks and the genesis block
//! - The append-only ledger with its chain-integrity check
//! - The pending-transaction pool

pub mod transaction;
pub mod block;
pub mod ledger;
pub mod mempool;

pub use transaction::*;
pub use block::*;
pub use ledger::*;
pub use mempool::*;
