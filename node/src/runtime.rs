//! Node runtime combining all components

use parking_lot::Mutex;
use pbftchain_consensus::{
    create_consensus_channel, ConsensusEvent, LocalReplica, Outcome, PbftEngine, ReplicaSet,
    ReplicaState, ReplicaStatus, SharedEngine, StateOptions,
};
use pbftchain_core::{NodeConfig, PbftError, PbftResult, PublicKey, ReplicaId};
use pbftchain_crypto::derivation::derive_replica_keypair;
use pbftchain_crypto::keys::KeyPair;
use pbftchain_ledger::{Block, Transaction};
use pbftchain_p2p::{HttpTransport, SharedPeerManager};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Node runtime managing all components
pub struct NodeRuntime {
    config: NodeConfig,
    engine: SharedEngine,
    peers: SharedPeerManager,
    events: Mutex<Option<mpsc::Receiver<ConsensusEvent>>>,
}

impl NodeRuntime {
    /// Build the replica from its configuration. With a `dev_seed`, every
    /// member's key is derived from the seed and pinned.
    pub fn new(config: NodeConfig, keypair: KeyPair, dev_seed: Option<&str>) -> PbftResult<Self> {
        config.validate()?;

        let replicas = build_replica_set(&config, dev_seed)?;
        let local = LocalReplica::new(config.replica_id, keypair);
        let options = StateOptions {
            max_block_transactions: config.consensus.max_block_transactions,
            ..StateOptions::default()
        };
        let state = ReplicaState::new(local, replicas, &config.genesis, options)?;

        let transport = HttpTransport::new(config.replica_id, &config.network)?;
        let peers = transport.peers();

        let (event_tx, event_rx) = create_consensus_channel(config.consensus.event_buffer);
        let mut engine = PbftEngine::new(state, Arc::new(transport));
        engine.set_event_channel(event_tx);

        info!(
            "Replica {} ready: {} replicas, quorum {}, {} peers",
            config.replica_id,
            config.consensus.replicas.len(),
            engine.status().quorum_size,
            peers.peer_count()
        );

        Ok(Self {
            config,
            engine: Arc::new(engine),
            peers,
            events: Mutex::new(Some(event_rx)),
        })
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.config.replica_id
    }

    /// Get config reference
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn peer_count(&self) -> usize {
        self.peers.peer_count()
    }

    pub fn status(&self) -> ReplicaStatus {
        self.engine.status()
    }

    /// Submit a client transaction
    pub fn submit_transaction(&self, tx: Transaction) -> PbftResult<Outcome> {
        self.engine.submit_transaction(tx)
    }

    pub fn ledger(&self) -> Vec<Block> {
        self.engine.ledger()
    }

    pub fn ledger_len(&self) -> usize {
        self.engine.ledger_len()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        self.engine.block(index)
    }

    pub fn find_transaction(&self, tx_id: &str) -> Option<u64> {
        self.engine.find_transaction(tx_id)
    }

    /// Pending transaction ids in arrival order
    pub fn mempool_tx_ids(&self) -> Vec<String> {
        self.engine
            .pending_transactions()
            .into_iter()
            .map(|tx| tx.id)
            .collect()
    }

    pub fn is_transaction_pending(&self, tx_id: &str) -> bool {
        self.engine.with_state(|state| state.pool().contains(tx_id))
    }

    /// Log consensus events. Returns `None` if already started.
    pub fn spawn_event_logger(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.events.lock().take()?;
        let id = self.config.replica_id;

        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                log_event(id, &event);
            }
            debug!("Event stream for {} closed", id);
        }))
    }
}

fn log_event(id: ReplicaId, event: &ConsensusEvent) {
    match event {
        ConsensusEvent::Committed {
            index,
            hash,
            transactions,
        } => info!(
            "[{}] committed block {} ({}) with {} transaction(s)",
            id, index, hash, transactions
        ),
        ConsensusEvent::LeaderRotated { view, leader } => {
            info!("[{}] {} led by {}", id, view, leader)
        }
        ConsensusEvent::Abandoned { view, hash } => {
            warn!("[{}] abandoned proposal {} from {}", id, hash, view)
        }
        other => debug!("[{}] {:?}", id, other),
    }
}

/// Replica set from config, with every known key pinned
pub fn build_replica_set(config: &NodeConfig, dev_seed: Option<&str>) -> PbftResult<ReplicaSet> {
    let mut set = ReplicaSet::new(config.consensus.replicas.clone())?;

    if let Some(seed) = dev_seed {
        for &id in config.consensus.replicas.iter() {
            set.pin_key(id, derive_replica_keypair(seed, id)?.public_key())?;
        }
    }

    for peer in &config.network.peers {
        if let Some(key_hex) = &peer.public_key {
            let key = PublicKey::from_hex(key_hex).map_err(|_| PbftError::InvalidPublicKey)?;
            if let Some(pinned) = set.pinned_key(peer.id) {
                if *pinned != key {
                    return Err(PbftError::ConfigError(format!(
                        "configured key for {} differs from the dev seed key",
                        peer.id
                    )));
                }
            }
            set.pin_key(peer.id, key)?;
        }
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbftchain_core::{ConsensusConfig, PeerConfig};

    fn single_replica_config() -> NodeConfig {
        NodeConfig {
            consensus: ConsensusConfig {
                replicas: vec![ReplicaId(1)],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_runtime_creation() {
        let runtime = NodeRuntime::new(single_replica_config(), KeyPair::generate(), None).unwrap();

        let status = runtime.status();
        assert_eq!(status.replica_id, ReplicaId(1));
        assert!(status.is_leader);
        assert_eq!(status.quorum_size, 1);
        assert_eq!(runtime.ledger_len(), 1);
    }

    #[tokio::test]
    async fn test_single_replica_commits_submission() {
        let runtime = NodeRuntime::new(single_replica_config(), KeyPair::generate(), None).unwrap();
        let client = KeyPair::generate();

        let outcome = runtime
            .submit_transaction(Transaction::new("tx-1", "Alice", "Bob", 5, &client))
            .unwrap();
        assert_eq!(outcome, Outcome::Accepted);
        assert_eq!(runtime.find_transaction("tx-1"), Some(1));
        assert!(!runtime.is_transaction_pending("tx-1"));
        assert!(runtime.mempool_tx_ids().is_empty());
    }

    #[tokio::test]
    async fn test_event_logger_starts_once() {
        let runtime = NodeRuntime::new(single_replica_config(), KeyPair::generate(), None).unwrap();

        let handle = runtime.spawn_event_logger();
        assert!(handle.is_some());
        assert!(runtime.spawn_event_logger().is_none());
    }

    #[test]
    fn test_dev_seed_pins_every_member() {
        let config = NodeConfig::default();
        let set = build_replica_set(&config, Some("devnet")).unwrap();

        for &id in config.consensus.replicas.iter() {
            let expected = derive_replica_keypair("devnet", id).unwrap().public_key();
            assert_eq!(set.pinned_key(id), Some(&expected));
        }
    }

    #[test]
    fn test_rejects_wrong_local_key_under_dev_seed() {
        let config = NodeConfig::default();
        assert!(matches!(
            NodeRuntime::new(config, KeyPair::generate(), Some("devnet")),
            Err(PbftError::ConfigError(_))
        ));
    }

    #[test]
    fn test_configured_key_must_parse() {
        let mut config = NodeConfig::default();
        config.network.peers.push(PeerConfig {
            id: ReplicaId(2),
            address: "http://127.0.0.1:8002".into(),
            public_key: Some("not-hex".into()),
        });

        assert!(matches!(
            build_replica_set(&config, None),
            Err(PbftError::InvalidPublicKey)
        ));
    }
}
