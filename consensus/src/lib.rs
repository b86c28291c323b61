//! PBFTCHAIN Consensus Engine
//!
//! Simplified PBFT over a fixed replica set:
//! - PrePrepare / Prepare / Commit with 2f+1 quorum certificates
//! - Certificates keyed by block content hash
//! - Round-robin leader rotation that abandons in-flight proposals
//! - A lock-guarded replica actor with fire-and-forget sends

pub mod engine;
pub mod message;
pub mod proposal;
pub mod quorum;
pub mod replica;
pub mod state;
pub mod transport;

pub use engine::*;
pub use message::*;
pub use proposal::*;
pub use quorum::*;
pub use replica::*;
pub use state::*;
pub use transport::*;
