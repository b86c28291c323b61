//! PBFTCHAIN Cryptography Module
//! 
//! Provides cryptographic primitives using standard, audited algorithms:
//! - Ed25519 for signatures, applied to SHA-256 digests of canonical payloads
//! - SHA-256 for block and payload hashing
//! - HKDF for deterministic development keys

pub mod keys;
pub mod signing;
pub mod hashing;
pub mod derivation;

pub use keys::*;
pub use signing::*;
pub use hashing::*;
pub use derivation::*;
