//! Solana RPC boundary.

mod http;

use async_trait::async_trait;
use chain_sol::Pubkey;
use thiserror::Error;

use crate::network::SolanaNetwork;

pub use http::HttpSolanaRpc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid rpc response: {0}")]
    InvalidResponse(String),
}

/// A recent blockhash and the network it was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentBlockhash {
    pub blockhash: [u8; 32],
    pub last_valid_block_height: u64,
    pub network: SolanaNetwork,
}

#[async_trait]
pub trait SolanaRpc: Send + Sync {
    async fn latest_blockhash(&self, network: SolanaNetwork) -> Result<RecentBlockhash, RpcError>;

    async fn account_exists(&self, address: &Pubkey, network: SolanaNetwork)
        -> Result<bool, RpcError>;

    /// Submits a signed wire transaction; returns its base58 signature.
    async fn send_transaction(
        &self,
        wire_transaction: &[u8],
        network: SolanaNetwork,
    ) -> Result<String, RpcError>;
}
