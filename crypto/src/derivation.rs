//! Key derivation using HKDF
//!
//! Local development clusters derive every replica key from one shared seed
//! so that a cluster can be brought up without distributing key files.

use hkdf::Hkdf;
use pbftchain_core::{PbftError, PbftResult, ReplicaId};
use sha2::Sha256;

use crate::keys::{KeyPair, SecretKey};

/// Derive a key using HKDF-SHA256
pub fn derive_key(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output_length: usize,
) -> PbftResult<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = vec![0u8; output_length];

    hk.expand(info, &mut output)
        .map_err(|e| PbftError::KeyDerivationFailed(e.to_string()))?;

    Ok(output)
}

/// Derive a 32-byte key
pub fn derive_key_32(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> PbftResult<[u8; 32]> {
    let key = derive_key(input_key_material, salt, info, 32)?;
    let mut result = [0u8; 32];
    result.copy_from_slice(&key);
    Ok(result)
}

/// Derive a keypair from a seed and path
pub fn derive_keypair(seed: &[u8], path: &str) -> PbftResult<KeyPair> {
    let secret = SecretKey::new(derive_key_32(seed, Some(b"pbftchain-dev"), path.as_bytes())?);
    Ok(secret.to_keypair())
}

/// Derive the development keypair of one replica from a cluster seed
pub fn derive_replica_keypair(cluster_seed: &str, replica: ReplicaId) -> PbftResult<KeyPair> {
    if cluster_seed.is_empty() {
        return Err(PbftError::KeyDerivationFailed("empty cluster seed".into()));
    }
    derive_keypair(cluster_seed.as_bytes(), &format!("pbftchain/replica/{}", replica.0))
}
