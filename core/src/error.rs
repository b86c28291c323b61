//! Error types for PBFTCHAIN
//!
//! No variant is fatal to a replica: every protocol error is recovered by
//! dropping the offending message and continuing.

use crate::types::{Hash, ReplicaId, View};
use thiserror::Error;

/// Main error type for PBFTCHAIN
#[derive(Error, Debug)]
pub enum PbftError {
    // ============ Cryptography Errors ============
    #[error("Invalid signature")]
    SignatureInvalid,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // ============ Protocol Errors ============
    #[error("Wrong leader for {view}: got {got}, expected {expected}")]
    WrongLeader {
        view: View,
        expected: ReplicaId,
        got: ReplicaId,
    },

    #[error("Message for {got} does not match current view {current}")]
    StaleView { current: View, got: View },

    #[error("Block hash mismatch: claimed {claimed}, computed {computed}")]
    BlockHashMismatch { claimed: Hash, computed: Hash },

    #[error("Conflicting proposal at index {index}: already bound to {existing}")]
    ConflictingProposal { index: u64, existing: Hash },

    #[error("Unknown replica: {0}")]
    UnknownReplica(ReplicaId),

    // ============ Ledger Errors ============
    #[error("Chain integrity violation: {0}")]
    ChainIntegrityViolation(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    // ============ Network Errors ============
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(ReplicaId),

    #[error("Message serialization failed: {0}")]
    SerializationError(String),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for PbftError {
    fn from(err: std::io::Error) -> Self {
        PbftError::Io(err.to_string())
    }
}

impl From<bincode::Error> for PbftError {
    fn from(err: bincode::Error) -> Self {
        PbftError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for PbftError {
    fn from(err: serde_json::Error) -> Self {
        PbftError::SerializationError(err.to_string())
    }
}
