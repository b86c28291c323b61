//! SHA-256 hashing

use pbftchain_core::Hash;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of data
pub fn sha256_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash::from_bytes(hasher.finalize().into())
}

/// Default hash function
pub fn hash(data: &[u8]) -> Hash {
    sha256_hash(data)
}

/// Hash the concatenation of several parts without allocating
pub fn hash_multiple(parts: &[&[u8]]) -> Hash {
    let mut hasher = IncrementalHasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// Incremental hasher for data assembled piece by piece
pub struct IncrementalHasher {
    hasher: Sha256,
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> Hash {
        Hash::from_bytes(self.hasher.finalize().into())
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}
