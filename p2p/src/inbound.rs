//! Inbound peer route

use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
use pbftchain_consensus::{Outcome, PbftEngine, PeerMessage, SharedEngine};
use pbftchain_core::ReplicaId;
use tracing::{debug, warn};

use crate::message::{Envelope, MESSAGE_PATH};

/// Router serving `POST /pbft/message`
pub fn peer_routes(engine: SharedEngine) -> Router {
    Router::new()
        .route(MESSAGE_PATH, post(receive_envelope))
        .with_state(engine)
}

/// Malformed or unsupported envelopes get 400. Anything decodable is
/// acknowledged with 202; protocol rejections are logged by the engine.
async fn receive_envelope(State(engine): State<SharedEngine>, body: Bytes) -> StatusCode {
    let envelope = match Envelope::decode(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Rejected peer envelope: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    debug!(
        "Received {} message from {}",
        envelope.message_type(),
        envelope.from
    );
    deliver(&engine, envelope.from, envelope.payload);
    StatusCode::ACCEPTED
}

/// Hand a decoded payload to the engine, logging what it made of it.
/// Rejections come back as `None`; the engine has already logged them.
fn deliver(engine: &PbftEngine, from: ReplicaId, payload: PeerMessage) -> Option<Outcome> {
    let kind = payload.kind();
    match engine.receive(payload) {
        Ok(outcome) => {
            debug!("{} message from {}: {:?}", kind, from, outcome);
            Some(outcome)
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PROTOCOL_VERSION;
    use crate::network::HttpTransport;
    use crate::peer::{PeerInfo, PeerManager};
    use axum::body::Body;
    use axum::http::Request;
    use pbftchain_consensus::{
        LocalReplica, PbftEngine, PeerMessage, RecordingTransport, ReplicaSet, ReplicaState,
        StateOptions, Transport,
    };
    use pbftchain_core::{GenesisConfig, ReplicaId};
    use pbftchain_crypto::keys::KeyPair;
    use pbftchain_ledger::Transaction;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn engine(id: u64) -> SharedEngine {
        let local = LocalReplica::new(ReplicaId(id), KeyPair::generate());
        let set = ReplicaSet::new((1..=4).map(ReplicaId).collect()).unwrap();
        let state =
            ReplicaState::new(local, set, &GenesisConfig::default(), StateOptions::default())
                .unwrap();
        Arc::new(PbftEngine::new(state, Arc::new(RecordingTransport::new())))
    }

    fn forwarded_tx() -> PeerMessage {
        PeerMessage::Transaction(Transaction::new("1", "Alice", "Bob", 10, &KeyPair::generate()))
    }

    fn post_bytes(bytes: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(MESSAGE_PATH)
            .body(Body::from(bytes))
            .unwrap()
    }

    #[tokio::test]
    async fn test_accepts_current_envelope() {
        let engine = engine(2);
        let app = peer_routes(engine.clone());
        let bytes = Envelope::new(ReplicaId(1), forwarded_tx()).to_bytes().unwrap();

        let response = app.oneshot(post_bytes(bytes)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(engine.pending_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_reports_outcome() {
        let engine = engine(2);
        let tx = forwarded_tx();

        assert_eq!(deliver(&engine, ReplicaId(1), tx.clone()), Some(Outcome::Accepted));
        assert_eq!(
            deliver(&engine, ReplicaId(3), tx),
            Some(Outcome::DuplicateTransaction)
        );

        let mut bad = Transaction::new("2", "Alice", "Bob", 10, &KeyPair::generate());
        bad.amount = 11;
        assert_eq!(deliver(&engine, ReplicaId(1), PeerMessage::Transaction(bad)), None);
        assert_eq!(engine.pending_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_unsupported_version() {
        let engine = engine(2);
        let app = peer_routes(engine.clone());
        let mut envelope = Envelope::new(ReplicaId(1), forwarded_tx());
        envelope.version = PROTOCOL_VERSION + 1;

        let response = app
            .oneshot(post_bytes(envelope.to_bytes().unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(engine.pending_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_http_transport_round_trip() {
        let receiver = engine(2);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = peer_routes(receiver.clone());
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        let peers = Arc::new(PeerManager::new());
        peers.add_peer(PeerInfo::new(ReplicaId(2), format!("http://{}", addr)));
        let transport =
            HttpTransport::with_peers(ReplicaId(1), peers.clone(), Duration::from_secs(2)).unwrap();

        transport.send(ReplicaId(2), forwarded_tx()).await.unwrap();
        assert_eq!(receiver.pending_transactions().len(), 1);
        assert!(peers.get_peer(ReplicaId(2)).unwrap().last_success.is_some());

        // Unknown peer fails without a request
        assert!(transport.send(ReplicaId(3), forwarded_tx()).await.is_err());

        server.abort();
    }
}
