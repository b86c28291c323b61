//! Wire envelope for replica-to-replica messages

use pbftchain_consensus::PeerMessage;
use pbftchain_core::{PbftError, PbftResult, ReplicaId};
use serde::{Deserialize, Serialize};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Path peers post envelopes to
pub const MESSAGE_PATH: &str = "/pbft/message";

/// Versioned frame around a peer message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    /// Replica that sent the envelope
    pub from: ReplicaId,
    pub payload: PeerMessage,
}

impl Envelope {
    pub fn new(from: ReplicaId, payload: PeerMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            from,
            payload,
        }
    }

    pub fn to_bytes(&self) -> PbftResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode without checking the version
    pub fn from_bytes(bytes: &[u8]) -> PbftResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Decode and reject unsupported versions
    pub fn decode(bytes: &[u8]) -> PbftResult<Self> {
        let envelope = Self::from_bytes(bytes)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(PbftError::SerializationError(format!(
                "unsupported protocol version {}",
                envelope.version
            )));
        }
        Ok(envelope)
    }

    pub fn message_type(&self) -> &'static str {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbftchain_crypto::keys::KeyPair;
    use pbftchain_ledger::Transaction;

    fn envelope() -> Envelope {
        let tx = Transaction::new("1", "Alice", "Bob", 10, &KeyPair::generate());
        Envelope::new(ReplicaId(3), PeerMessage::Transaction(tx))
    }

    #[test]
    fn test_decode_current_version() {
        let env = envelope();
        let decoded = Envelope::decode(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.from, ReplicaId(3));
        assert_eq!(decoded.payload, env.payload);
        assert_eq!(decoded.message_type(), "transaction");
    }

    #[test]
    fn test_rejects_other_version() {
        let mut env = envelope();
        env.version = PROTOCOL_VERSION + 1;
        let bytes = env.to_bytes().unwrap();

        assert!(Envelope::from_bytes(&bytes).is_ok());
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(PbftError::SerializationError(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Envelope::decode(&[0xff, 0x01]).is_err());
    }
}
