//! Full node implementation

use crate::api::start_api_server;
use crate::runtime::NodeRuntime;
use pbftchain_core::{NodeConfig, PbftResult, ReplicaId};
use pbftchain_crypto::keys::KeyPair;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// A running PBFTCHAIN replica
pub struct PbftNode {
    runtime: Arc<NodeRuntime>,
}

impl PbftNode {
    pub fn new(config: NodeConfig, keypair: KeyPair, dev_seed: Option<&str>) -> PbftResult<Self> {
        let runtime = Arc::new(NodeRuntime::new(config, keypair, dev_seed)?);
        Ok(Self { runtime })
    }

    /// Serve, rotate leaders and log events until ctrl-c
    pub async fn start(&self) -> anyhow::Result<()> {
        let config = self.runtime.config();
        info!("Starting replica {} ({})", config.replica_id, config.name);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let events = self.runtime.spawn_event_logger();

        let server_runtime = self.runtime.clone();
        let listen_addr = config.network.listen_addr.clone();
        let mut server_shutdown = shutdown_rx.clone();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            };
            if let Err(e) = start_api_server(server_runtime, &listen_addr, shutdown).await {
                error!("HTTP server error: {}", e);
            }
        });

        let rotation = self.runtime.engine().spawn_rotation(
            Duration::from_millis(config.consensus.rotation_interval_ms),
            shutdown_rx,
        );

        // Wait for shutdown signal
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping replica..."),
            Err(e) => error!("Error waiting for shutdown signal: {}", e),
        }

        let _ = shutdown_tx.send(true);
        let _ = rotation.await;
        let _ = server.await;
        if let Some(events) = events {
            events.abort();
        }

        info!("Replica {} stopped", config.replica_id);
        Ok(())
    }

    pub fn runtime(&self) -> &Arc<NodeRuntime> {
        &self.runtime
    }
}

/// Node builder for easier configuration
pub struct NodeBuilder {
    config: NodeConfig,
    keypair: Option<KeyPair>,
    dev_seed: Option<String>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            keypair: None,
            dev_seed: None,
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn keypair(mut self, keypair: KeyPair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    pub fn replica_id(mut self, id: ReplicaId) -> Self {
        self.config.replica_id = id;
        self
    }

    /// Derive and pin every replica key from a shared development seed
    pub fn dev_seed(mut self, seed: impl Into<String>) -> Self {
        self.dev_seed = Some(seed.into());
        self
    }

    pub fn listen_addr(mut self, addr: &str) -> Self {
        self.config.network.listen_addr = addr.to_string();
        self
    }

    /// Without an explicit keypair, a dev seed derives this replica's key
    /// and otherwise a fresh one is generated.
    pub fn build(self) -> PbftResult<PbftNode> {
        let keypair = match (self.keypair, &self.dev_seed) {
            (Some(keypair), _) => keypair,
            (None, Some(seed)) => {
                pbftchain_crypto::derivation::derive_replica_keypair(seed, self.config.replica_id)?
            }
            (None, None) => KeyPair::generate(),
        };
        PbftNode::new(self.config, keypair, self.dev_seed.as_deref())
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builder_derives_dev_key() {
        let node = NodeBuilder::new()
            .replica_id(ReplicaId(3))
            .dev_seed("devnet")
            .build()
            .unwrap();

        let status = node.runtime().status();
        assert_eq!(status.replica_id, ReplicaId(3));
        assert!(!status.is_leader);
        assert_eq!(status.quorum_size, 3);
    }

    #[test]
    fn test_builder_rejects_foreign_replica() {
        let result = NodeBuilder::new().replica_id(ReplicaId(9)).build();
        assert!(result.is_err());
    }
}
