//! Client transactions

use pbftchain_core::{PbftError, PbftResult, PublicKey, Signable, Signature};
use pbftchain_crypto::keys::KeyPair;
use pbftchain_crypto::signing::{sign, verify};
use serde::{Deserialize, Serialize};

/// Maximum length of any string field
pub const MAX_FIELD_LEN: usize = 256;

/// A signed transfer submitted by a client.
///
/// Identity is the client-chosen `id`; the pool and ledger deduplicate on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub from: String,
    pub to: String,
    pub amount: u64,
    /// Key of the submitting client
    pub public_key: PublicKey,
    pub signature: Signature,
}

impl Transaction {
    /// Create and sign a new transaction
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        amount: u64,
        keypair: &KeyPair,
    ) -> Self {
        let mut tx = Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            amount,
            public_key: keypair.public_key(),
            signature: Signature::EMPTY,
        };
        tx.signature = sign(keypair, &tx.signing_bytes());
        tx
    }

    /// Check structure and signature
    pub fn validate(&self) -> PbftResult<()> {
        for (name, value) in [("id", &self.id), ("from", &self.from), ("to", &self.to)] {
            if value.is_empty() {
                return Err(PbftError::InvalidTransaction(format!("{} is empty", name)));
            }
            if value.len() > MAX_FIELD_LEN {
                return Err(PbftError::InvalidTransaction(format!("{} is too long", name)));
            }
        }

        self.verify_signature()
    }

    /// Verify the transaction signature
    pub fn verify_signature(&self) -> PbftResult<()> {
        verify(&self.public_key, &self.signing_bytes(), &self.signature)
            .map_err(|_| PbftError::InvalidTransaction("invalid signature".into()))
    }
}

impl Signable for Transaction {
    fn signing_bytes(&self) -> Vec<u8> {
        // Length prefixes keep ("ab","c") and ("a","bc") distinct
        let mut bytes = Vec::with_capacity(64 + self.id.len() + self.from.len() + self.to.len());
        bytes.extend_from_slice(b"PBFT_TX:");
        for field in [&self.id, &self.from, &self.to] {
            bytes.extend_from_slice(&(field.len() as u32).to_le_bytes());
            bytes.extend_from_slice(field.as_bytes());
        }
        bytes.extend_from_slice(&self.amount.to_le_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_transaction_validates() {
        let kp = KeyPair::generate();
        let tx = Transaction::new("1", "Alice", "Bob", 10, &kp);
        assert!(tx.validate().is_ok());
    }

    #[test]
    fn test_tampered_amount_fails() {
        let kp = KeyPair::generate();
        let mut tx = Transaction::new("1", "Alice", "Bob", 10, &kp);
        tx.amount = 1_000;
        assert!(matches!(tx.validate(), Err(PbftError::InvalidTransaction(_))));
    }

    #[test]
    fn test_empty_id_rejected() {
        let kp = KeyPair::generate();
        let tx = Transaction::new("", "Alice", "Bob", 10, &kp);
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let kp = KeyPair::generate();
        let a = Transaction::new("1", "ab", "c", 1, &kp);
        let mut b = a.clone();
        b.from = "a".into();
        b.to = "bc".into();
        assert_ne!(a.signing_bytes(), b.signing_bytes());
        assert!(b.verify_signature().is_err());
    }
}
