//! Peer management

use dashmap::DashMap;
use pbftchain_core::{PbftError, PbftResult, PeerConfig, ReplicaId, Timestamp};
use std::sync::Arc;

/// Peer information
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: ReplicaId,
    /// Base URL, without trailing slash
    pub address: String,
    pub last_success: Option<Timestamp>,
    /// Failed sends since the last success
    pub consecutive_failures: u32,
}

impl PeerInfo {
    pub fn new(id: ReplicaId, address: impl Into<String>) -> Self {
        let address: String = address.into();
        Self {
            id,
            address: address.trim_end_matches('/').to_string(),
            last_success: None,
            consecutive_failures: 0,
        }
    }

    /// URL of the peer's message endpoint
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

/// Peer table, shared between send tasks
pub struct PeerManager {
    peers: DashMap<ReplicaId, PeerInfo>,
}

impl PeerManager {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    pub fn from_config(peers: &[PeerConfig]) -> Self {
        let manager = Self::new();
        for peer in peers {
            manager.add_peer(PeerInfo::new(peer.id, peer.address.clone()));
        }
        manager
    }

    /// Add or replace a peer
    pub fn add_peer(&self, info: PeerInfo) {
        self.peers.insert(info.id, info);
    }

    pub fn get_peer(&self, id: ReplicaId) -> Option<PeerInfo> {
        self.peers.get(&id).map(|p| p.clone())
    }

    /// Resolve a peer or fail with `PeerNotFound`
    pub fn resolve(&self, id: ReplicaId) -> PbftResult<PeerInfo> {
        self.get_peer(id).ok_or(PbftError::PeerNotFound(id))
    }

    pub fn record_success(&self, id: ReplicaId) {
        if let Some(mut peer) = self.peers.get_mut(&id) {
            peer.last_success = Some(Timestamp::now());
            peer.consecutive_failures = 0;
        }
    }

    pub fn record_failure(&self, id: ReplicaId) -> u32 {
        match self.peers.get_mut(&id) {
            Some(mut peer) => {
                peer.consecutive_failures += 1;
                peer.consecutive_failures
            }
            None => 0,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

impl Default for PeerManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared peer manager
pub type SharedPeerManager = Arc<PeerManager>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_and_unknown() {
        let manager = PeerManager::from_config(&[PeerConfig {
            id: ReplicaId(2),
            address: "http://127.0.0.1:8002/".into(),
            public_key: None,
        }]);

        let peer = manager.resolve(ReplicaId(2)).unwrap();
        assert_eq!(peer.url("/pbft/message"), "http://127.0.0.1:8002/pbft/message");
        assert!(matches!(
            manager.resolve(ReplicaId(9)),
            Err(PbftError::PeerNotFound(_))
        ));
    }

    #[test]
    fn test_failure_counter_resets() {
        let manager = PeerManager::new();
        manager.add_peer(PeerInfo::new(ReplicaId(2), "http://a"));

        assert_eq!(manager.record_failure(ReplicaId(2)), 1);
        assert_eq!(manager.record_failure(ReplicaId(2)), 2);
        manager.record_success(ReplicaId(2));

        let peer = manager.get_peer(ReplicaId(2)).unwrap();
        assert_eq!(peer.consecutive_failures, 0);
        assert!(peer.last_success.is_some());
        assert_eq!(manager.record_failure(ReplicaId(7)), 0);
    }
}
