//! The custody façade.
//!
//! `CustodyWallet` wires the five stages together from one configuration.
//! Every call mints its own AuthContext; wallet records are passed in by
//! the caller and never cached here.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::{AuthContext, AuthContextBuilder, PrimaryIdentity};
use crate::broadcast::{Broadcaster, TransactionResult};
use crate::builder::{TransactionBuilder, UnsignedTransaction};
use crate::config::CustodyConfig;
use crate::derivation::WalletDerivationManager;
use crate::error::{CustodyError, Failure, Stage};
use crate::key_service::ThresholdKeyService;
use crate::network::SolanaNetwork;
use crate::rpc::{HttpSolanaRpc, SolanaRpc};
use crate::signing::{SignedTransaction, SigningPipeline};
use crate::types::{Lamports, TokenBaseUnits, WalletKeyInfo};

/// A native SOL transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeTransfer {
    pub to: String,
    pub amount: Lamports,
    /// Cluster name; the configured default when absent.
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub broadcast: bool,
}

/// An SPL token transfer request. `amount` is in the mint's base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub to: String,
    pub mint: String,
    pub amount: TokenBaseUnits,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub broadcast: bool,
}

/// The operations an outer layer (CLI, job runner) can dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    CreateWallet,
    SendNative {
        wallet: WalletKeyInfo,
        transfer: NativeTransfer,
    },
    SendToken {
        wallet: WalletKeyInfo,
        transfer: TokenTransfer,
    },
    CreateWalletAndSendNative {
        transfer: NativeTransfer,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OperationOutcome {
    WalletCreated {
        wallet: WalletKeyInfo,
    },
    Transfer {
        result: TransactionResult,
    },
    WalletCreatedAndTransfer {
        wallet: WalletKeyInfo,
        result: TransactionResult,
    },
}

pub struct CustodyWallet {
    config: CustodyConfig,
    derivation: WalletDerivationManager,
    builder: TransactionBuilder,
    signer: SigningPipeline,
    broadcaster: Broadcaster,
}

impl CustodyWallet {
    pub fn new(
        config: CustodyConfig,
        key_service: Arc<dyn ThresholdKeyService>,
        rpc: Arc<dyn SolanaRpc>,
    ) -> Result<Self, CustodyError> {
        config.validate()?;
        let timeout = config.request_timeout();

        Ok(Self {
            derivation: WalletDerivationManager::new(key_service.clone(), timeout),
            builder: TransactionBuilder::new(rpc.clone(), timeout),
            signer: SigningPipeline::new(key_service, config.quorum, timeout),
            broadcaster: Broadcaster::new(rpc, timeout),
            config,
        })
    }

    /// Uses the JSON-RPC client against the configured endpoints.
    pub fn connect(
        config: CustodyConfig,
        key_service: Arc<dyn ThresholdKeyService>,
    ) -> Result<Self, CustodyError> {
        let rpc = HttpSolanaRpc::new(config.rpc_url.clone(), config.request_timeout())
            .map_err(|e| Failure::InvalidConfig(e.to_string()).at(Stage::Config))?;
        Self::new(config, key_service, Arc::new(rpc))
    }

    pub fn config(&self) -> &CustodyConfig {
        &self.config
    }

    /// Derives a new wallet controlled by `identity`. Persist the result.
    pub async fn create_wallet(
        &self,
        identity: &PrimaryIdentity,
    ) -> Result<WalletKeyInfo, CustodyError> {
        let auth = self.mint_auth(identity, Stage::DeriveWallet)?;
        self.derivation.derive_wallet(&auth).await
    }

    pub async fn send_native(
        &self,
        identity: &PrimaryIdentity,
        wallet: &WalletKeyInfo,
        transfer: &NativeTransfer,
    ) -> Result<TransactionResult, CustodyError> {
        let stage = Stage::BuildNativeTransfer;
        let network = self
            .resolve_network(transfer.network.as_deref(), stage)
            .map_err(|e| e.with_wallet(&wallet.wallet_id))?;

        let tx = self
            .builder
            .build_native_transfer(&wallet.derived_address, &transfer.to, transfer.amount, network)
            .await
            .map_err(|e| e.with_wallet(&wallet.wallet_id))?;

        let signed = self.sign(identity, wallet, &tx).await?;
        self.broadcaster
            .submit(&signed, network, transfer.broadcast)
            .await
    }

    pub async fn send_token(
        &self,
        identity: &PrimaryIdentity,
        wallet: &WalletKeyInfo,
        transfer: &TokenTransfer,
    ) -> Result<TransactionResult, CustodyError> {
        let stage = Stage::BuildTokenTransfer;
        let network = self
            .resolve_network(transfer.network.as_deref(), stage)
            .map_err(|e| e.with_wallet(&wallet.wallet_id))?;

        let tx = self
            .builder
            .build_token_transfer(
                &wallet.derived_address,
                &transfer.to,
                &transfer.mint,
                transfer.amount,
                network,
            )
            .await
            .map_err(|e| e.with_wallet(&wallet.wallet_id))?;

        let signed = self.sign(identity, wallet, &tx).await?;
        self.broadcaster
            .submit(&signed, network, transfer.broadcast)
            .await
    }

    pub async fn execute(
        &self,
        identity: &PrimaryIdentity,
        operation: Operation,
    ) -> Result<OperationOutcome, CustodyError> {
        match operation {
            Operation::CreateWallet => Ok(OperationOutcome::WalletCreated {
                wallet: self.create_wallet(identity).await?,
            }),
            Operation::SendNative { wallet, transfer } => Ok(OperationOutcome::Transfer {
                result: self.send_native(identity, &wallet, &transfer).await?,
            }),
            Operation::SendToken { wallet, transfer } => Ok(OperationOutcome::Transfer {
                result: self.send_token(identity, &wallet, &transfer).await?,
            }),
            Operation::CreateWalletAndSendNative { transfer } => {
                let wallet = self.create_wallet(identity).await?;
                let result = self.send_native(identity, &wallet, &transfer).await?;
                Ok(OperationOutcome::WalletCreatedAndTransfer { wallet, result })
            }
        }
    }

    async fn sign(
        &self,
        identity: &PrimaryIdentity,
        wallet: &WalletKeyInfo,
        tx: &UnsignedTransaction,
    ) -> Result<SignedTransaction, CustodyError> {
        let auth = self
            .mint_auth(identity, Stage::Sign)
            .map_err(|e| e.with_wallet(&wallet.wallet_id))?;
        self.signer.sign(&auth, wallet, tx).await
    }

    fn mint_auth(&self, identity: &PrimaryIdentity, stage: Stage) -> Result<AuthContext, CustodyError> {
        let network = self
            .config
            .threshold_network()
            .map_err(|failure| failure.at(stage))?;
        AuthContextBuilder::new(network).build(identity, self.config.auth_validity())
    }

    fn resolve_network(&self, requested: Option<&str>, stage: Stage) -> Result<SolanaNetwork, CustodyError> {
        match requested {
            Some(name) => name
                .parse::<SolanaNetwork>()
                .map_err(|e| Failure::from(e).at(stage)),
            None => self.config.solana_network().map_err(|failure| failure.at(stage)),
        }
    }
}
