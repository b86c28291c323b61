//! Client for the replica HTTP API

use pbftchain_ledger::Transaction;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// API client for one replica
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::builder().timeout(Duration::from_secs(30)).build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn status(&self) -> Result<NodeStatus, ApiError> {
        self.get("/status").await
    }

    /// Submit a signed transaction
    pub async fn submit_transaction(
        &self,
        tx: &Transaction,
    ) -> Result<TransactionStatus, ApiError> {
        let url = format!("{}/transaction", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&TransactionRequest::from(tx))
            .send()
            .await?
            .json()
            .await?;
        unwrap_response(resp)
    }

    pub async fn transaction(&self, id: &str) -> Result<TransactionStatus, ApiError> {
        self.get(&format!("/transaction/{}", id)).await
    }

    pub async fn ledger(&self) -> Result<Vec<BlockInfo>, ApiError> {
        self.get("/ledger").await
    }

    pub async fn block(&self, index: u64) -> Result<BlockInfo, ApiError> {
        self.get(&format!("/ledger/{}", index)).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let resp: ApiResponse<T> = self.client.get(&url).send().await?.json().await?;
        unwrap_response(resp)
    }
}

fn unwrap_response<T>(resp: ApiResponse<T>) -> Result<T, ApiError> {
    if resp.success {
        resp.data.ok_or(ApiError::EmptyResponse)
    } else {
        Err(ApiError::Server(resp.error.unwrap_or_default()))
    }
}

/// API response wrapper
#[derive(Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Replica status
#[derive(Debug, Deserialize)]
pub struct NodeStatus {
    pub replica_id: u64,
    pub view: u64,
    pub leader: u64,
    pub is_leader: bool,
    pub ledger_length: usize,
    pub tail_index: u64,
    pub tail_hash: String,
    pub pending_transactions: usize,
    pub replicas: usize,
    pub quorum_size: usize,
}

/// Wire form of a signed transaction
#[derive(Debug, Serialize)]
pub struct TransactionRequest {
    pub id: String,
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub public_key: String,
    pub signature: String,
}

impl From<&Transaction> for TransactionRequest {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.clone(),
            from: tx.from.clone(),
            to: tx.to.clone(),
            amount: tx.amount,
            public_key: tx.public_key.to_hex(),
            signature: tx.signature.to_hex(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransactionStatus {
    pub id: String,
    pub status: String,
    pub block: Option<u64>,
}

impl TransactionStatus {
    pub fn is_committed(&self) -> bool {
        self.block.is_some()
    }
}

#[derive(Debug, Deserialize)]
pub struct TransactionInfo {
    pub id: String,
    pub from: String,
    pub to: String,
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct BlockInfo {
    pub index: u64,
    pub hash: String,
    pub prev_hash: String,
    pub timestamp: u64,
    pub proposer: u64,
    pub transactions: Vec<TransactionInfo>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Empty response")]
    EmptyResponse,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbftchain_crypto::keys::KeyPair;

    #[test]
    fn test_request_carries_hex_credentials() {
        let keypair = KeyPair::generate();
        let tx = Transaction::new("tx-1", "Alice", "Bob", 9, &keypair);
        let req = TransactionRequest::from(&tx);

        assert_eq!(req.public_key, keypair.public_key().to_hex());
        assert_eq!(req.signature.len(), 128);

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["amount"], 9);
    }

    #[test]
    fn test_unwrap_response() {
        let ok: ApiResponse<u32> =
            serde_json::from_str(r#"{"success":true,"data":3,"error":null}"#).unwrap();
        assert_eq!(unwrap_response(ok).unwrap(), 3);

        let failed: ApiResponse<u32> =
            serde_json::from_str(r#"{"success":false,"data":null,"error":"boom"}"#).unwrap();
        assert!(matches!(unwrap_response(failed), Err(ApiError::Server(e)) if e == "boom"));

        let empty: ApiResponse<u32> =
            serde_json::from_str(r#"{"success":true,"data":null,"error":null}"#).unwrap();
        assert!(matches!(unwrap_response(empty), Err(ApiError::EmptyResponse)));
    }

    #[test]
    fn test_status_matches_node_payload() {
        let status: NodeStatus = serde_json::from_str(
            r#"{"replica_id":2,"view":5,"leader":2,"is_leader":true,"ledger_length":3,
                "tail_index":2,"tail_hash":"ab","pending_transactions":0,"replicas":4,
                "quorum_size":3}"#,
        )
        .unwrap();
        assert_eq!(status.quorum_size, 3);
        assert!(status.is_leader);
    }
}
