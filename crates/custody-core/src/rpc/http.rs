//! JSON-RPC client for Solana clusters.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chain_sol::Pubkey;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{RecentBlockhash, RpcError, SolanaRpc};
use crate::network::SolanaNetwork;

pub struct HttpSolanaRpc {
    client: reqwest::Client,
    endpoint_override: Option<String>,
}

impl HttpSolanaRpc {
    /// `endpoint_override` replaces every cluster's public endpoint.
    pub fn new(endpoint_override: Option<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint_override,
        })
    }

    pub fn endpoint(&self, network: SolanaNetwork) -> String {
        self.endpoint_override
            .clone()
            .unwrap_or_else(|| network.default_rpc_url().to_string())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        network: SolanaNetwork,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let body: Value = self
            .client
            .post(self.endpoint(network))
            .json(&payload)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;

        tracing::debug!(%network, method, "rpc call completed");
        decode_response(body)
    }
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockhashValue {
    blockhash: String,
    last_valid_block_height: u64,
}

fn decode_response<T: DeserializeOwned>(mut body: Value) -> Result<T, RpcError> {
    if let Some(error) = body.get_mut("error").map(Value::take) {
        let error: RpcErrorObject = serde_json::from_value(error)
            .map_err(|e| RpcError::InvalidResponse(format!("malformed error object: {e}")))?;
        return Err(RpcError::Rpc {
            code: error.code,
            message: error.message,
        });
    }

    let result = body
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| RpcError::InvalidResponse("missing result".into()))?;
    serde_json::from_value(result).map_err(|e| RpcError::InvalidResponse(e.to_string()))
}

fn decode_blockhash(
    value: WithContext<BlockhashValue>,
    network: SolanaNetwork,
) -> Result<RecentBlockhash, RpcError> {
    let blockhash: Pubkey = value
        .value
        .blockhash
        .parse()
        .map_err(|e| RpcError::InvalidResponse(format!("blockhash: {e}")))?;

    Ok(RecentBlockhash {
        blockhash: blockhash.to_bytes(),
        last_valid_block_height: value.value.last_valid_block_height,
        network,
    })
}

#[async_trait]
impl SolanaRpc for HttpSolanaRpc {
    async fn latest_blockhash(&self, network: SolanaNetwork) -> Result<RecentBlockhash, RpcError> {
        let value: WithContext<BlockhashValue> = self
            .call(
                network,
                "getLatestBlockhash",
                json!([{ "commitment": "finalized" }]),
            )
            .await?;
        decode_blockhash(value, network)
    }

    async fn account_exists(
        &self,
        address: &Pubkey,
        network: SolanaNetwork,
    ) -> Result<bool, RpcError> {
        let value: WithContext<Option<Value>> = self
            .call(
                network,
                "getAccountInfo",
                json!([
                    address.to_string(),
                    { "encoding": "base64", "commitment": "confirmed" }
                ]),
            )
            .await?;
        Ok(value.value.is_some())
    }

    async fn send_transaction(
        &self,
        wire_transaction: &[u8],
        network: SolanaNetwork,
    ) -> Result<String, RpcError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(wire_transaction);
        self.call(
            network,
            "sendTransaction",
            json!([
                encoded,
                {
                    "encoding": "base64",
                    "skipPreflight": false,
                    "preflightCommitment": "confirmed"
                }
            ]),
        )
        .await
    }
}
