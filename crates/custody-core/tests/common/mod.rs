//! Shared fixtures: an in-memory RPC and key-service wrappers that misbehave
//! in controlled ways.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chain_sol::{split_wire_transaction, Pubkey};
use custody_core::{
    AuthContext, CustodyConfig, CustodyWallet, KeyServiceError, LocalKeyService, PrimaryIdentity,
    RecentBlockhash, RpcError, SignatureShares, SolanaNetwork, SolanaRpc, ThresholdKeyService,
    ThresholdNetwork, WalletId, WalletKeyInfo,
};

pub const OWNER_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const OTHER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

pub const RECIPIENT: &str = "BTBPKRJQv7mn2kxBBJUpzh3wKN567ZLdXDWcxXFQ4KaV";
pub const BONK_MINT: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

pub const BLOCKHASH: [u8; 32] = [7u8; 32];

pub fn owner() -> PrimaryIdentity {
    PrimaryIdentity::from_hex(OWNER_KEY).unwrap()
}

pub fn other() -> PrimaryIdentity {
    PrimaryIdentity::from_hex(OTHER_KEY).unwrap()
}

// ─── RPC ─────────────────────────────────────────────────────────────

/// Answers blockhash and account queries from memory and records every
/// submitted transaction.
#[derive(Default)]
pub struct MockRpc {
    accounts: Mutex<HashSet<Pubkey>>,
    submitted: Mutex<Vec<Vec<u8>>>,
    reject_submissions: bool,
}

impl MockRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject_submissions: true,
            ..Self::default()
        }
    }

    pub fn with_account(self, address: &str) -> Self {
        self.add_account(address.parse().unwrap());
        self
    }

    pub fn add_account(&self, address: Pubkey) {
        self.accounts.lock().unwrap().insert(address);
    }

    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl SolanaRpc for MockRpc {
    async fn latest_blockhash(&self, network: SolanaNetwork) -> Result<RecentBlockhash, RpcError> {
        Ok(RecentBlockhash {
            blockhash: BLOCKHASH,
            last_valid_block_height: 1_000,
            network,
        })
    }

    async fn account_exists(
        &self,
        address: &Pubkey,
        _network: SolanaNetwork,
    ) -> Result<bool, RpcError> {
        Ok(self.accounts.lock().unwrap().contains(address))
    }

    async fn send_transaction(
        &self,
        wire_transaction: &[u8],
        _network: SolanaNetwork,
    ) -> Result<String, RpcError> {
        if self.reject_submissions {
            return Err(RpcError::Rpc {
                code: -32002,
                message: "Transaction simulation failed: insufficient funds".into(),
            });
        }
        let (signatures, _) = split_wire_transaction(wire_transaction)
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
        self.submitted
            .lock()
            .unwrap()
            .push(wire_transaction.to_vec());
        Ok(bs58::encode(signatures[0]).into_string())
    }
}

// ─── Key services ────────────────────────────────────────────────────

pub fn local_service() -> Arc<LocalKeyService> {
    Arc::new(LocalKeyService::new(ThresholdNetwork::DatilDev, 2, 3).unwrap())
}

/// Counts calls before delegating.
pub struct CountingService {
    pub inner: Arc<LocalKeyService>,
    calls: AtomicUsize,
}

impl CountingService {
    pub fn new(inner: Arc<LocalKeyService>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn sign_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThresholdKeyService for CountingService {
    async fn derive_wallet(&self, auth: &AuthContext) -> Result<WalletKeyInfo, KeyServiceError> {
        self.inner.derive_wallet(auth).await
    }

    async fn sign(
        &self,
        auth: &AuthContext,
        wallet_id: &WalletId,
        payload: &[u8],
    ) -> Result<SignatureShares, KeyServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.sign(auth, wallet_id, payload).await
    }
}

/// Echoes back a payload that differs from the one it was given.
pub struct TamperingService {
    pub inner: Arc<LocalKeyService>,
}

#[async_trait]
impl ThresholdKeyService for TamperingService {
    async fn derive_wallet(&self, auth: &AuthContext) -> Result<WalletKeyInfo, KeyServiceError> {
        self.inner.derive_wallet(auth).await
    }

    async fn sign(
        &self,
        auth: &AuthContext,
        wallet_id: &WalletId,
        payload: &[u8],
    ) -> Result<SignatureShares, KeyServiceError> {
        let mut response = self.inner.sign(auth, wallet_id, payload).await?;
        if let Some(last) = response.payload.last_mut() {
            *last ^= 0xff;
        }
        Ok(response)
    }
}

/// Keeps only the first `keep` signature shares.
pub struct ShareDroppingService {
    pub inner: Arc<LocalKeyService>,
    pub keep: usize,
}

#[async_trait]
impl ThresholdKeyService for ShareDroppingService {
    async fn derive_wallet(&self, auth: &AuthContext) -> Result<WalletKeyInfo, KeyServiceError> {
        self.inner.derive_wallet(auth).await
    }

    async fn sign(
        &self,
        auth: &AuthContext,
        wallet_id: &WalletId,
        payload: &[u8],
    ) -> Result<SignatureShares, KeyServiceError> {
        let mut response = self.inner.sign(auth, wallet_id, payload).await?;
        let dropped: Vec<_> = response.shares.keys().skip(self.keep).cloned().collect();
        for id in dropped {
            response.shares.remove(&id);
        }
        Ok(response)
    }
}

// ─── Façade ──────────────────────────────────────────────────────────

pub fn config() -> CustodyConfig {
    CustodyConfig {
        request_timeout_ms: 5_000,
        ..CustodyConfig::default()
    }
}

pub fn custody(
    service: Arc<dyn ThresholdKeyService>,
    rpc: Arc<MockRpc>,
) -> CustodyWallet {
    CustodyWallet::new(config(), service, rpc).unwrap()
}
