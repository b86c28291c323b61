//! Core traits shared across crates

use crate::types::Hash;

/// Result type for PBFTCHAIN operations
pub type PbftResult<T> = Result<T, crate::error::PbftError>;

/// Trait for types identified by a content hash
pub trait Hashable {
    /// Compute the hash of this object
    fn hash(&self) -> Hash;
}

/// Trait for types that carry a signature over a canonical encoding
pub trait Signable {
    /// Deterministic bytes covered by the signature. Signer and verifier
    /// must produce identical output for identical field values.
    fn signing_bytes(&self) -> Vec<u8>;
}
