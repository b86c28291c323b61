//! Digital signatures: Ed25519 over the SHA-256 digest of a payload

use ed25519_dalek::{Signer, Verifier};
use pbftchain_core::{PbftError, PbftResult, PublicKey, Signature};

use crate::hashing::sha256_hash;
use crate::keys::{public_key_to_ed25519, KeyPair};

/// Sign the SHA-256 digest of `payload`
pub fn sign(keypair: &KeyPair, payload: &[u8]) -> Signature {
    let digest = sha256_hash(payload);
    let signature = keypair.signing_key().sign(digest.as_bytes());
    Signature::from_bytes(signature.to_bytes())
}

/// Recompute the digest of `payload` and check it against `signature`
pub fn verify(public_key: &PublicKey, payload: &[u8], signature: &Signature) -> PbftResult<()> {
    let verifying_key = public_key_to_ed25519(public_key)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    let digest = sha256_hash(payload);

    verifying_key
        .verify(digest.as_bytes(), &sig)
        .map_err(|_| PbftError::SignatureInvalid)
}

/// Check if a signature is valid (returns bool instead of Result)
pub fn is_valid_signature(public_key: &PublicKey, payload: &[u8], signature: &Signature) -> bool {
    verify(public_key, payload, signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let message = b"Hello, PBFTCHAIN!";

        let signature = sign(&keypair, message);
        assert!(verify(&keypair.public_key(), message, &signature).is_ok());
    }

    #[test]
    fn test_invalid_signature() {
        let keypair1 = KeyPair::generate();
        let keypair2 = KeyPair::generate();
        let message = b"Hello, PBFTCHAIN!";

        let signature = sign(&keypair1, message);

        assert!(matches!(
            verify(&keypair2.public_key(), message, &signature),
            Err(PbftError::SignatureInvalid)
        ));
        assert!(!is_valid_signature(&keypair1.public_key(), b"Different message", &signature));
    }

    #[test]
    fn test_every_flipped_byte_fails() {
        let keypair = KeyPair::generate();
        let message = b"phase|sender|timestamp|index|hash|prev".to_vec();
        let signature = sign(&keypair, &message);

        for i in 0..message.len() {
            let mut tampered = message.clone();
            tampered[i] ^= 0x01;
            assert!(!is_valid_signature(&keypair.public_key(), &tampered, &signature));
        }
    }
}
