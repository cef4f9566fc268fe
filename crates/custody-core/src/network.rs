use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Failure;

pub const DEVNET_RPC: &str = "https://api.devnet.solana.com";
pub const TESTNET_RPC: &str = "https://api.testnet.solana.com";
pub const MAINNET_BETA_RPC: &str = "https://api.mainnet-beta.solana.com";

const EXPLORER_BASE: &str = "https://explorer.solana.com";

/// Prefix of the AuthContext resource that scopes a credential to one
/// threshold network.
pub const THRESHOLD_RESOURCE_PREFIX: &str = "urn:threshold:network:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetwork(pub String);

impl From<UnknownNetwork> for Failure {
    fn from(e: UnknownNetwork) -> Self {
        Failure::UnknownNetwork(e.0)
    }
}

/// Solana clusters a transaction can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolanaNetwork {
    Devnet,
    Testnet,
    MainnetBeta,
}

impl SolanaNetwork {
    pub fn as_str(self) -> &'static str {
        match self {
            SolanaNetwork::Devnet => "devnet",
            SolanaNetwork::Testnet => "testnet",
            SolanaNetwork::MainnetBeta => "mainnet-beta",
        }
    }

    /// Public RPC endpoint for this cluster.
    pub fn default_rpc_url(self) -> &'static str {
        match self {
            SolanaNetwork::Devnet => DEVNET_RPC,
            SolanaNetwork::Testnet => TESTNET_RPC,
            SolanaNetwork::MainnetBeta => MAINNET_BETA_RPC,
        }
    }

    /// Explorer link for a transaction signature.
    pub fn explorer_tx_url(self, signature: &str) -> String {
        match self {
            SolanaNetwork::MainnetBeta => format!("{EXPLORER_BASE}/tx/{signature}"),
            other => format!("{EXPLORER_BASE}/tx/{signature}?cluster={}", other.as_str()),
        }
    }
}

impl fmt::Display for SolanaNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SolanaNetwork {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "devnet" => Ok(SolanaNetwork::Devnet),
            "testnet" => Ok(SolanaNetwork::Testnet),
            "mainnet-beta" => Ok(SolanaNetwork::MainnetBeta),
            other => Err(UnknownNetwork(other.to_string())),
        }
    }
}

/// Threshold signing networks an AuthContext can be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdNetwork {
    DatilDev,
    DatilTest,
    Datil,
}

impl ThresholdNetwork {
    pub fn as_str(self) -> &'static str {
        match self {
            ThresholdNetwork::DatilDev => "datil-dev",
            ThresholdNetwork::DatilTest => "datil-test",
            ThresholdNetwork::Datil => "datil",
        }
    }

    /// The AuthContext resource naming this network.
    pub fn resource(self) -> String {
        format!("{THRESHOLD_RESOURCE_PREFIX}{}", self.as_str())
    }
}

impl fmt::Display for ThresholdNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThresholdNetwork {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "datil-dev" => Ok(ThresholdNetwork::DatilDev),
            "datil-test" => Ok(ThresholdNetwork::DatilTest),
            "datil" => Ok(ThresholdNetwork::Datil),
            other => Err(UnknownNetwork(other.to_string())),
        }
    }
}
