//! HTTP transport between replicas

use async_trait::async_trait;
use pbftchain_consensus::{PeerMessage, Transport};
use pbftchain_core::{NetworkConfig, PbftError, PbftResult, ReplicaId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::message::{Envelope, MESSAGE_PATH};
use crate::peer::{PeerManager, SharedPeerManager};

/// Posts bincode envelopes to `{peer}/pbft/message`. One attempt per
/// message; failures are returned, never retried.
pub struct HttpTransport {
    local: ReplicaId,
    client: reqwest::Client,
    peers: SharedPeerManager,
}

impl HttpTransport {
    pub fn new(local: ReplicaId, config: &NetworkConfig) -> PbftResult<Self> {
        let peers = Arc::new(PeerManager::from_config(&config.peers));
        Self::with_peers(local, peers, Duration::from_millis(config.request_timeout_ms))
    }

    pub fn with_peers(
        local: ReplicaId,
        peers: SharedPeerManager,
        timeout: Duration,
    ) -> PbftResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PbftError::TransportFailure(e.to_string()))?;

        Ok(Self {
            local,
            client,
            peers,
        })
    }

    pub fn peers(&self) -> SharedPeerManager {
        self.peers.clone()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, peer: ReplicaId, msg: PeerMessage) -> PbftResult<()> {
        let info = self.peers.resolve(peer)?;
        let envelope = Envelope::new(self.local, msg);
        let body = envelope.to_bytes()?;

        let result = self
            .client
            .post(info.url(MESSAGE_PATH))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!("Sent {} message to {}", envelope.message_type(), peer);
                self.peers.record_success(peer);
                Ok(())
            }
            Ok(response) => {
                let failures = self.peers.record_failure(peer);
                warn!(
                    "{} answered {} ({} consecutive failures)",
                    peer,
                    response.status(),
                    failures
                );
                Err(PbftError::TransportFailure(format!(
                    "{} answered {}",
                    peer,
                    response.status()
                )))
            }
            Err(e) => {
                self.peers.record_failure(peer);
                Err(PbftError::TransportFailure(format!("{}: {}", peer, e)))
            }
        }
    }
}
