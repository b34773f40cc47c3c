/// JSON-RPC client for the remote Pactus node.
///
/// Wraps the five logical node services (wallet, blockchain, network,
/// transaction, utils) behind typed calls. Every transport or node failure
/// maps to a uniform `ChainError`; no retries and no caching happen here —
/// broadcast is not idempotent, so retry policy stays with the caller.
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ChainError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for node RPC communication.
#[derive(Debug, Clone)]
pub struct ChainClient {
    client: Client,
    base_url: String,
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: String,
    method: String,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
#[allow(dead_code)] // fields are populated via serde; not all are read by all call sites
struct JsonRpcResponse<T> {
    jsonrpc: String,
    result: Option<T>,
    error: Option<JsonRpcError>,
    id: u64,
}

/// JSON-RPC error structure
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub address: String,
    pub balance: u64,
    pub sequence: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkStatus {
    pub network_name: String,
    pub connected_peers: u32,
    pub block_height: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionInfo {
    pub id: String,
    pub confirmed: bool,
    pub block_height: Option<u64>,
}

impl ChainClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        Ok(ChainClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    // --- wallet service ---

    /// Spendable balance for an address.
    pub async fn get_balance(&self, address: &str) -> Result<u64, ChainError> {
        let params = serde_json::json!({ "address": address });
        let response: BalanceResponse = self.rpc_call("wallet_get_balance", params).await?;
        Ok(response.balance)
    }

    // --- blockchain service ---

    /// Full account state for an address.
    pub async fn get_account_info(&self, address: &str) -> Result<AccountInfo, ChainError> {
        let params = serde_json::json!({ "address": address });
        self.rpc_call("blockchain_get_account", params).await
    }

    // --- network service ---

    pub async fn get_network_status(&self) -> Result<NetworkStatus, ChainError> {
        self.rpc_call("network_get_status", serde_json::Value::Null)
            .await
    }

    // --- transaction service ---

    /// Submit a signed raw transaction. Returns the transaction id assigned
    /// by the node. A cancelled or timed-out call means "outcome unknown",
    /// not "not submitted".
    pub async fn submit_transaction(&self, signed_tx_hex: &str) -> Result<String, ChainError> {
        let params = serde_json::json!({ "signed_raw_transaction": signed_tx_hex });
        let response: serde_json::Value = self.rpc_call("transaction_send_raw", params).await?;
        response
            .get("tx_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ChainError::Rejected("malformed transaction response".to_string()))
    }

    pub async fn get_transaction(&self, tx_id: &str) -> Result<TransactionInfo, ChainError> {
        let params = serde_json::json!({ "tx_id": tx_id });
        self.rpc_call("transaction_get", params).await
    }

    // --- utils service ---

    /// Ask the node to verify a detached signature.
    pub async fn verify_message(
        &self,
        message: &str,
        signature: &str,
        public_key: &str,
    ) -> Result<bool, ChainError> {
        let params = serde_json::json!({
            "message": message,
            "signature": signature,
            "public_key": public_key
        });
        let response: serde_json::Value = self.rpc_call("utils_verify_message", params).await?;
        response
            .get("is_valid")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| ChainError::Rejected("malformed verification response".to_string()))
    }

    /// Make a JSON-RPC call to the node.
    async fn rpc_call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ChainError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let url = format!("{}/jsonrpc", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(ChainError::Unavailable(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let rpc_response: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| ChainError::Rejected(format!("malformed response: {}", e)))?;

        into_result(rpc_response)
    }
}

fn map_transport_error(error: reqwest::Error) -> ChainError {
    if error.is_timeout() {
        ChainError::Timeout
    } else {
        ChainError::Unavailable(error.to_string())
    }
}

fn into_result<T>(response: JsonRpcResponse<T>) -> Result<T, ChainError> {
    if let Some(error) = response.error {
        return Err(ChainError::Rejected(format!(
            "RPC error {}: {}",
            error.code, error.message
        )));
    }

    response
        .result
        .ok_or_else(|| ChainError::Rejected("no result in RPC response".to_string()))
}
