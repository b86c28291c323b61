//! Replica set, leader schedule, and the local signing identity

use pbftchain_core::{PbftError, PbftResult, PublicKey, ReplicaId, Signature, View};
use pbftchain_crypto::keys::KeyPair;
use pbftchain_crypto::signing::sign;
use pbftchain_ledger::Block;
use std::collections::{HashMap, HashSet};

use crate::message::{Phase, ProtocolMessage};

/// The fixed set of replicas, in leader-rotation order
#[derive(Debug, Clone)]
pub struct ReplicaSet {
    members: Vec<ReplicaId>,
    /// Pinned keys, where known
    keys: HashMap<ReplicaId, PublicKey>,
}

impl ReplicaSet {
    pub fn new(members: Vec<ReplicaId>) -> PbftResult<Self> {
        if members.is_empty() {
            return Err(PbftError::ConfigError("replica set is empty".into()));
        }
        let distinct: HashSet<&ReplicaId> = members.iter().collect();
        if distinct.len() != members.len() {
            return Err(PbftError::ConfigError("replica set contains duplicates".into()));
        }
        Ok(Self {
            members,
            keys: HashMap::new(),
        })
    }

    /// Pin the key a replica must sign with
    pub fn pin_key(&mut self, id: ReplicaId, key: PublicKey) -> PbftResult<()> {
        if !self.contains(id) {
            return Err(PbftError::UnknownReplica(id));
        }
        self.keys.insert(id, key);
        Ok(())
    }

    pub fn with_keys(
        members: Vec<ReplicaId>,
        keys: impl IntoIterator<Item = (ReplicaId, PublicKey)>,
    ) -> PbftResult<Self> {
        let mut set = Self::new(members)?;
        for (id, key) in keys {
            set.pin_key(id, key)?;
        }
        Ok(set)
    }

    pub fn members(&self) -> &[ReplicaId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: ReplicaId) -> bool {
        self.members.contains(&id)
    }

    /// Maximum tolerated faulty replicas, `f = (n - 1) / 3`
    pub fn fault_tolerance(&self) -> usize {
        (self.members.len() - 1) / 3
    }

    /// Votes required per certificate.
    ///
    /// `2f + 1` when `n = 3f + 1`; for other sizes the smallest count at which
    /// any two quorums share a correct replica.
    pub fn quorum_size(&self) -> usize {
        (self.members.len() + self.fault_tolerance()) / 2 + 1
    }

    /// Leader of a view: members are taken round-robin
    pub fn leader_for(&self, view: View) -> ReplicaId {
        let slot = (view.0 % self.members.len() as u64) as usize;
        self.members[slot]
    }

    /// Every member except `id`
    pub fn peers_of(&self, id: ReplicaId) -> impl Iterator<Item = ReplicaId> + '_ {
        self.members.iter().copied().filter(move |m| *m != id)
    }

    pub fn pinned_key(&self, id: ReplicaId) -> Option<&PublicKey> {
        self.keys.get(&id)
    }

    /// Check a message's claimed identity. Rejects non-members, keys that
    /// differ from a pinned key, and bad signatures.
    pub fn authenticate(&self, msg: &ProtocolMessage) -> PbftResult<()> {
        if !self.contains(msg.sender) {
            return Err(PbftError::UnknownReplica(msg.sender));
        }
        if let Some(pinned) = self.keys.get(&msg.sender) {
            if *pinned != msg.sender_key {
                return Err(PbftError::SignatureInvalid);
            }
        }
        msg.verify()
    }
}

/// This replica's identity
#[derive(Clone)]
pub struct LocalReplica {
    id: ReplicaId,
    keypair: KeyPair,
}

impl LocalReplica {
    pub fn new(id: ReplicaId, keypair: KeyPair) -> Self {
        Self { id, keypair }
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Sign a payload
    pub fn sign(&self, payload: &[u8]) -> Signature {
        sign(&self.keypair, payload)
    }

    /// Build a signed message for `block` in `view`
    pub fn message(&self, phase: Phase, view: View, block: Block) -> ProtocolMessage {
        ProtocolMessage::new(phase, view, self.id, self.public_key(), block, |payload| {
            self.sign(payload)
        })
    }
}

impl std::fmt::Debug for LocalReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalReplica")
            .field("id", &self.id)
            .field("public_key", &self.public_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbftchain_core::GenesisConfig;
    use pbftchain_ledger::genesis_block;

    fn ids(n: u64) -> Vec<ReplicaId> {
        (1..=n).map(ReplicaId).collect()
    }

    #[test]
    fn test_quorum_sizes() {
        let four = ReplicaSet::new(ids(4)).unwrap();
        assert_eq!(four.fault_tolerance(), 1);
        assert_eq!(four.quorum_size(), 3);

        let seven = ReplicaSet::new(ids(7)).unwrap();
        assert_eq!(seven.fault_tolerance(), 2);
        assert_eq!(seven.quorum_size(), 5);

        let one = ReplicaSet::new(ids(1)).unwrap();
        assert_eq!(one.quorum_size(), 1);

        // n = 5: two quorums of 4 overlap in 3 > f
        let five = ReplicaSet::new(ids(5)).unwrap();
        assert_eq!(five.quorum_size(), 4);
    }

    #[test]
    fn test_leader_rotation_is_round_robin() {
        let set = ReplicaSet::new(ids(4)).unwrap();
        assert_eq!(set.leader_for(View(0)), ReplicaId(1));
        assert_eq!(set.leader_for(View(1)), ReplicaId(2));
        assert_eq!(set.leader_for(View(4)), ReplicaId(1));
        assert_eq!(set.peers_of(ReplicaId(2)).collect::<Vec<_>>(), vec![
            ReplicaId(1),
            ReplicaId(3),
            ReplicaId(4)
        ]);
    }

    #[test]
    fn test_rejects_bad_sets() {
        assert!(ReplicaSet::new(vec![]).is_err());
        assert!(ReplicaSet::new(vec![ReplicaId(1), ReplicaId(1)]).is_err());
    }

    #[test]
    fn test_authenticate_checks_pinned_key() {
        let real = LocalReplica::new(ReplicaId(2), KeyPair::generate());
        let impostor = LocalReplica::new(ReplicaId(2), KeyPair::generate());
        let set = ReplicaSet::with_keys(ids(4), [(ReplicaId(2), real.public_key())]).unwrap();

        let block = genesis_block(&GenesisConfig::default());
        assert!(set.authenticate(&real.message(Phase::Prepare, View(0), block.clone())).is_ok());
        assert!(matches!(
            set.authenticate(&impostor.message(Phase::Prepare, View(0), block.clone())),
            Err(PbftError::SignatureInvalid)
        ));

        let outsider = LocalReplica::new(ReplicaId(9), KeyPair::generate());
        assert!(matches!(
            set.authenticate(&outsider.message(Phase::Prepare, View(0), block)),
            Err(PbftError::UnknownReplica(_))
        ));
    }
}
