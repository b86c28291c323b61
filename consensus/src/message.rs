//! Protocol messages and their canonical signing payload

use pbftchain_core::{
    Hash, PbftResult, PublicKey, ReplicaId, Signable, Signature, Timestamp, View,
};
use pbftchain_crypto::signing::verify;
use pbftchain_ledger::{Block, Transaction};
use serde::{Deserialize, Serialize};
use std::fmt;

/// PBFT phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    PrePrepare,
    Prepare,
    Commit,
}

impl Phase {
    /// Byte tag used in the canonical payload
    pub fn tag(&self) -> u8 {
        match self {
            Phase::PrePrepare => 1,
            Phase::Prepare => 2,
            Phase::Commit => 3,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PrePrepare => write!(f, "PrePrepare"),
            Phase::Prepare => write!(f, "Prepare"),
            Phase::Commit => write!(f, "Commit"),
        }
    }
}

/// A signed consensus message carrying the block by value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub phase: Phase,
    /// View the sender was in when it signed
    pub view: View,
    pub sender: ReplicaId,
    /// Key the signature verifies against
    pub sender_key: PublicKey,
    pub timestamp: Timestamp,
    pub block: Block,
    pub signature: Signature,
}

impl ProtocolMessage {
    /// Create a new message
    pub fn new(
        phase: Phase,
        view: View,
        sender: ReplicaId,
        sender_key: PublicKey,
        block: Block,
        sign_fn: impl FnOnce(&[u8]) -> Signature,
    ) -> Self {
        let timestamp = Timestamp::now();
        let payload = canonical_payload(
            phase,
            sender,
            timestamp,
            block.index,
            &block.hash,
            &block.prev_hash,
            view,
        );
        let signature = sign_fn(&payload);

        Self {
            phase,
            view,
            sender,
            sender_key,
            timestamp,
            block,
            signature,
        }
    }

    /// Verify the signature against the carried sender key
    pub fn verify(&self) -> PbftResult<()> {
        verify(&self.sender_key, &self.signing_bytes(), &self.signature)
    }

    pub fn block_hash(&self) -> Hash {
        self.block.hash
    }
}

impl Signable for ProtocolMessage {
    fn signing_bytes(&self) -> Vec<u8> {
        canonical_payload(
            self.phase,
            self.sender,
            self.timestamp,
            self.block.index,
            &self.block.hash,
            &self.block.prev_hash,
            self.view,
        )
    }
}

/// Deterministic encoding of the signed fields. Integers are little-endian.
pub fn canonical_payload(
    phase: Phase,
    sender: ReplicaId,
    timestamp: Timestamp,
    index: u64,
    hash: &Hash,
    prev_hash: &Hash,
    view: View,
) -> Vec<u8> {
    let mut msg = Vec::with_capacity(9 + 1 + 8 * 4 + 64);
    msg.extend_from_slice(b"PBFT_MSG:");
    msg.push(phase.tag());
    msg.extend_from_slice(&sender.0.to_le_bytes());
    msg.extend_from_slice(&timestamp.0.to_le_bytes());
    msg.extend_from_slice(&index.to_le_bytes());
    msg.extend_from_slice(hash.as_bytes());
    msg.extend_from_slice(prev_hash.as_bytes());
    msg.extend_from_slice(&view.0.to_le_bytes());
    msg
}

/// Everything one replica sends another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    Consensus(ProtocolMessage),
    /// Client transaction forwarded by the replica that received it
    Transaction(Transaction),
}

impl PeerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Consensus(_) => "consensus",
            PeerMessage::Transaction(_) => "transaction",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbftchain_core::GenesisConfig;
    use pbftchain_crypto::keys::KeyPair;
    use pbftchain_crypto::signing::sign;
    use pbftchain_ledger::genesis_block;

    fn signed(kp: &KeyPair) -> ProtocolMessage {
        let genesis = genesis_block(&GenesisConfig::default());
        let tx = Transaction::new("1", "Alice", "Bob", 10, kp);
        let block = Block::child_of(&genesis, Timestamp::now(), vec![tx], ReplicaId(1));
        ProtocolMessage::new(
            Phase::Prepare,
            View(0),
            ReplicaId(1),
            kp.public_key(),
            block,
            |payload| sign(kp, payload),
        )
    }

    #[test]
    fn test_signed_message_verifies() {
        let kp = KeyPair::generate();
        assert!(signed(&kp).verify().is_ok());
    }

    #[test]
    fn test_mutating_any_signed_field_breaks_signature() {
        let kp = KeyPair::generate();
        let msg = signed(&kp);

        let mut m = msg.clone();
        m.phase = Phase::Commit;
        assert!(m.verify().is_err());

        let mut m = msg.clone();
        m.sender = ReplicaId(2);
        assert!(m.verify().is_err());

        let mut m = msg.clone();
        m.timestamp = Timestamp(m.timestamp.0 + 1);
        assert!(m.verify().is_err());

        let mut m = msg.clone();
        m.block.index += 1;
        assert!(m.verify().is_err());

        let mut m = msg.clone();
        m.block.hash = Hash::from_bytes([7u8; 32]);
        assert!(m.verify().is_err());

        let mut m = msg.clone();
        m.block.prev_hash = Hash::from_bytes([7u8; 32]);
        assert!(m.verify().is_err());

        let mut m = msg;
        m.view = View(1);
        assert!(m.verify().is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let kp = KeyPair::generate();
        let mut msg = signed(&kp);
        msg.sender_key = KeyPair::generate().public_key();
        assert!(msg.verify().is_err());
    }

    #[test]
    fn test_payload_is_deterministic() {
        let kp = KeyPair::generate();
        let msg = signed(&kp);
        assert_eq!(msg.signing_bytes(), msg.clone().signing_bytes());
        assert!(msg.signing_bytes().starts_with(b"PBFT_MSG:\x02"));
    }
}
