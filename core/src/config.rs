//! Configuration types for PBFTCHAIN

use crate::error::PbftError;
use crate::traits::PbftResult;
use crate::types::ReplicaId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// This replica's id; must appear in `consensus.replicas`
    pub replica_id: ReplicaId,

    /// Data directory (holds the node key)
    pub data_dir: PathBuf,

    /// Genesis parameters shared by every replica
    pub genesis: GenesisConfig,

    /// Network configuration
    pub network: NetworkConfig,

    /// Consensus configuration
    pub consensus: ConsensusConfig,

    /// API configuration
    pub api: ApiConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "pbftchain-node".to_string(),
            replica_id: ReplicaId::new(1),
            data_dir: PathBuf::from("./data"),
            genesis: GenesisConfig::default(),
            network: NetworkConfig::default(),
            consensus: ConsensusConfig::default(),
            api: ApiConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load a configuration from a JSON file
    pub fn from_file(path: &Path) -> PbftResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> PbftResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> PbftResult<()> {
        let replicas: HashSet<ReplicaId> = self.consensus.replicas.iter().copied().collect();

        if replicas.is_empty() {
            return Err(PbftError::ConfigError("replica set is empty".into()));
        }
        if replicas.len() != self.consensus.replicas.len() {
            return Err(PbftError::ConfigError("replica set contains duplicates".into()));
        }
        if !replicas.contains(&self.replica_id) {
            return Err(PbftError::ConfigError(format!(
                "{} is not a member of the replica set",
                self.replica_id
            )));
        }
        if self.consensus.rotation_interval_ms == 0 {
            return Err(PbftError::ConfigError(
                "rotation_interval_ms must be positive".into(),
            ));
        }
        if self.consensus.max_block_transactions == 0 {
            return Err(PbftError::ConfigError(
                "max_block_transactions must be positive".into(),
            ));
        }
        for peer in &self.network.peers {
            if !replicas.contains(&peer.id) {
                return Err(PbftError::ConfigError(format!(
                    "peer {} is not a member of the replica set",
                    peer.id
                )));
            }
        }

        Ok(())
    }
}

/// Genesis parameters. Every replica must use identical values so that
/// their genesis blocks hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Chain name, informational
    pub chain_name: String,

    /// Genesis timestamp in milliseconds
    pub timestamp: u64,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            chain_name: "PBFTCHAIN Devnet".to_string(),
            timestamp: 0,
        }
    }
}

/// Address of another replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: ReplicaId,

    /// Base URL, e.g. `http://127.0.0.1:8001`
    pub address: String,

    /// Hex-encoded public key. Pins the key this replica must sign with.
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listen address for peer traffic
    pub listen_addr: String,

    /// Other replicas, addressed by stable id
    pub peers: Vec<PeerConfig>,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8001".to_string(),
            peers: vec![],
            request_timeout_ms: 2000,
        }
    }
}

/// Consensus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Full replica set, in leader-rotation order
    pub replicas: Vec<ReplicaId>,

    /// Leader rotation period in milliseconds
    pub rotation_interval_ms: u64,

    /// Maximum transactions packaged into one block
    pub max_block_transactions: usize,

    /// Capacity of the consensus event channel
    pub event_buffer: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            replicas: vec![ReplicaId(1), ReplicaId(2), ReplicaId(3), ReplicaId(4)],
            rotation_interval_ms: 10_000,
            max_block_transactions: 100,
            event_buffer: 100,
        }
    }
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Enable client HTTP API routes
    pub enabled: bool,

    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_cors: true,
        }
    }
}
