//! HTTP API for a PBFTCHAIN replica

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use pbftchain_consensus::Outcome;
use pbftchain_core::{PublicKey, Signature};
use pbftchain_ledger::{Block, Transaction};
use pbftchain_p2p::peer_routes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::runtime::NodeRuntime;

/// API state containing node runtime
pub type ApiState = Arc<NodeRuntime>;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Signed transaction as submitted by clients. Keys and signatures are hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub id: String,
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub public_key: String,
    pub signature: String,
}

impl TransactionRequest {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            id: tx.id.clone(),
            from: tx.from.clone(),
            to: tx.to.clone(),
            amount: tx.amount,
            public_key: tx.public_key.to_hex(),
            signature: tx.signature.to_hex(),
        }
    }

    pub fn into_transaction(self) -> Result<Transaction, String> {
        let public_key = PublicKey::from_hex(&self.public_key).map_err(|_| "Invalid public key")?;
        let signature = Signature::from_hex(&self.signature).map_err(|_| "Invalid signature")?;

        Ok(Transaction {
            id: self.id,
            from: self.from,
            to: self.to,
            amount: self.amount,
            public_key,
            signature,
        })
    }
}

/// Transaction status: `pending`, `duplicate`, `committed` or `unknown`
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub id: String,
    pub status: String,
    /// Ledger index once committed
    pub block: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionView {
    pub id: String,
    pub from: String,
    pub to: String,
    pub amount: u64,
}

/// Block as served to clients
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockView {
    pub index: u64,
    pub hash: String,
    pub prev_hash: String,
    pub timestamp: u64,
    pub proposer: u64,
    pub transactions: Vec<TransactionView>,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        Self {
            index: block.index,
            hash: block.hash.to_hex(),
            prev_hash: block.prev_hash.to_hex(),
            timestamp: block.timestamp.as_millis(),
            proposer: block.proposer.0,
            transactions: block
                .transactions
                .iter()
                .map(|tx| TransactionView {
                    id: tx.id.clone(),
                    from: tx.from.clone(),
                    to: tx.to.clone(),
                    amount: tx.amount,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerLengthResponse {
    pub length: usize,
}

/// Client routes plus the peer route, on one router
pub fn create_router(state: ApiState) -> Router {
    let enable_cors = state.config().api.enable_cors;
    let mut router = peer_routes(state.engine().clone());

    if state.config().api.enabled {
        router = router.merge(client_routes(state));
    }
    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }

    router.layer(TraceLayer::new_for_http())
}

fn client_routes(state: ApiState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health))
        .route("/status", get(status))
        // Transactions
        .route("/transaction", post(submit_transaction))
        .route("/transaction/:id", get(get_transaction))
        // Ledger
        .route("/ledger", get(get_ledger))
        .route("/ledger/length", get(get_ledger_length))
        .route("/ledger/:index", get(get_block))
        // Mempool
        .route("/mempool", get(get_mempool))
        .with_state(state)
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn status(State(runtime): State<ApiState>) -> impl IntoResponse {
    Json(ApiResponse::ok(runtime.status()))
}

async fn submit_transaction(
    State(runtime): State<ApiState>,
    Json(req): Json<TransactionRequest>,
) -> impl IntoResponse {
    let tx = match req.into_transaction() {
        Ok(tx) => tx,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<TransactionResponse>::err(e)),
            )
        }
    };

    let id = tx.id.clone();
    match runtime.submit_transaction(tx) {
        Ok(Outcome::DuplicateTransaction) => (
            StatusCode::OK,
            Json(ApiResponse::ok(TransactionResponse {
                block: runtime.find_transaction(&id),
                id,
                status: "duplicate".to_string(),
            })),
        ),
        Ok(_) => {
            // A single replica may commit before the handler returns
            let block = runtime.find_transaction(&id);
            let status = if block.is_some() { "committed" } else { "pending" };
            (
                StatusCode::ACCEPTED,
                Json(ApiResponse::ok(TransactionResponse {
                    id,
                    status: status.to_string(),
                    block,
                })),
            )
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<TransactionResponse>::err(e)),
        ),
    }
}

async fn get_transaction(
    State(runtime): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let block = runtime.find_transaction(&id);
    let status = if block.is_some() {
        "committed"
    } else if runtime.is_transaction_pending(&id) {
        "pending"
    } else {
        "unknown"
    };

    Json(ApiResponse::ok(TransactionResponse {
        id,
        status: status.to_string(),
        block,
    }))
}

async fn get_ledger(State(runtime): State<ApiState>) -> impl IntoResponse {
    let blocks: Vec<BlockView> = runtime.ledger().iter().map(BlockView::from).collect();
    Json(ApiResponse::ok(blocks))
}

async fn get_ledger_length(State(runtime): State<ApiState>) -> impl IntoResponse {
    Json(ApiResponse::ok(LedgerLengthResponse {
        length: runtime.ledger_len(),
    }))
}

async fn get_block(
    State(runtime): State<ApiState>,
    Path(index): Path<String>,
) -> impl IntoResponse {
    let index = match index.parse::<u64>() {
        Ok(index) => index,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<BlockView>::err("Invalid block index")),
            )
        }
    };

    match runtime.block(index) {
        Some(block) => (StatusCode::OK, Json(ApiResponse::ok(BlockView::from(&block)))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<BlockView>::err(format!("No block at index {}", index))),
        ),
    }
}

async fn get_mempool(State(runtime): State<ApiState>) -> impl IntoResponse {
    Json(ApiResponse::ok(runtime.mempool_tx_ids()))
}

/// Serve the router on `listen_addr` until `shutdown` resolves
pub async fn start_api_server(
    runtime: ApiState,
    listen_addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = create_router(runtime);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use pbftchain_core::{ConsensusConfig, NodeConfig, ReplicaId};
    use pbftchain_crypto::keys::KeyPair;
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    fn runtime(replicas: Vec<ReplicaId>) -> ApiState {
        let config = NodeConfig {
            consensus: ConsensusConfig {
                replicas,
                ..Default::default()
            },
            ..Default::default()
        };
        Arc::new(NodeRuntime::new(config, KeyPair::generate(), None).unwrap())
    }

    async fn read<T: DeserializeOwned>(response: axum::response::Response) -> ApiResponse<T> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &impl Serialize) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    fn signed(id: &str) -> TransactionRequest {
        let tx = Transaction::new(id, "Alice", "Bob", 7, &KeyPair::generate());
        TransactionRequest::from_transaction(&tx)
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(runtime(vec![ReplicaId(1)]));
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_submit_commits_on_single_replica() {
        let state = runtime(vec![ReplicaId(1)]);
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json("/transaction", &signed("tx-1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body: ApiResponse<TransactionResponse> = read(response).await;
        let data = body.data.unwrap();
        assert_eq!(data.status, "committed");
        assert_eq!(data.block, Some(1));

        let response = app.clone().oneshot(get("/ledger/length")).await.unwrap();
        let body: ApiResponse<LedgerLengthResponse> = read(response).await;
        assert_eq!(body.data.unwrap().length, 2);

        let response = app.oneshot(get("/ledger/1")).await.unwrap();
        let body: ApiResponse<BlockView> = read(response).await;
        let block = body.data.unwrap();
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.prev_hash, state.block(0).unwrap().hash.to_hex());
    }

    #[tokio::test]
    async fn test_submission_pending_without_quorum() {
        let app = create_router(runtime(vec![ReplicaId(1), ReplicaId(2), ReplicaId(3), ReplicaId(4)]));

        let response = app
            .clone()
            .oneshot(post_json("/transaction", &signed("tx-1")))
            .await
            .unwrap();
        let body: ApiResponse<TransactionResponse> = read(response).await;
        assert_eq!(body.data.unwrap().status, "pending");

        let response = app
            .clone()
            .oneshot(post_json("/transaction", &signed("tx-1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: ApiResponse<TransactionResponse> = read(response).await;
        assert_eq!(body.data.unwrap().status, "duplicate");

        let response = app.clone().oneshot(get("/mempool")).await.unwrap();
        let body: ApiResponse<Vec<String>> = read(response).await;
        assert_eq!(body.data.unwrap(), vec!["tx-1".to_string()]);

        let response = app.oneshot(get("/transaction/tx-1")).await.unwrap();
        let body: ApiResponse<TransactionResponse> = read(response).await;
        assert_eq!(body.data.unwrap().status, "pending");
    }

    #[tokio::test]
    async fn test_rejects_tampered_transaction() {
        let app = create_router(runtime(vec![ReplicaId(1)]));
        let mut req = signed("tx-1");
        req.amount += 1;

        let response = app.oneshot(post_json("/transaction", &req)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ApiResponse<TransactionResponse> = read(response).await;
        assert!(!body.success);
    }

    #[tokio::test]
    async fn test_block_lookup_errors() {
        let app = create_router(runtime(vec![ReplicaId(1)]));

        let response = app.clone().oneshot(get("/ledger/9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(get("/ledger/abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_disabled_api_keeps_peer_route() {
        let mut config = NodeConfig {
            consensus: ConsensusConfig {
                replicas: vec![ReplicaId(1)],
                ..Default::default()
            },
            ..Default::default()
        };
        config.api.enabled = false;
        let state = Arc::new(NodeRuntime::new(config, KeyPair::generate(), None).unwrap());
        let app = create_router(state);

        let response = app.clone().oneshot(get("/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/pbft/message")
                    .body(Body::from(vec![0xffu8]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
