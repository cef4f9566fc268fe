//! An in-process `t`-of-`n` threshold network.
//!
//! Each derived wallet gets its own trusted-dealer FROST key: the dealer
//! splits a fresh Ed25519 secret into `n` shares, hands one to each node and
//! forgets the secret. Signing runs both FROST rounds across the nodes that
//! are currently online.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chain_eth::EthAddress;
use chain_sol::Pubkey;
use chrono::Utc;
use frost_ed25519 as frost;
use rand::rngs::OsRng;

use super::{KeyServiceError, SignatureShares, ThresholdKeyService};
use crate::auth::{AuthContext, AuthRejection};
use crate::network::ThresholdNetwork;
use crate::types::{WalletId, WalletKeyInfo};

#[derive(Clone)]
struct WalletShares {
    controller: EthAddress,
    key_packages: BTreeMap<frost::Identifier, frost::keys::KeyPackage>,
    public_key_package: frost::keys::PublicKeyPackage,
}

pub struct LocalKeyService {
    network: ThresholdNetwork,
    min_signers: u16,
    max_signers: u16,
    online_nodes: AtomicU16,
    latency: Duration,
    wallets: Mutex<HashMap<WalletId, WalletShares>>,
    sessions: Mutex<HashSet<WalletId>>,
}

impl LocalKeyService {
    /// A network of `max_signers` nodes where any `min_signers` can sign.
    pub fn new(
        network: ThresholdNetwork,
        min_signers: u16,
        max_signers: u16,
    ) -> Result<Self, KeyServiceError> {
        if min_signers < 2 || min_signers > max_signers {
            return Err(KeyServiceError::Protocol(format!(
                "invalid threshold {min_signers}-of-{max_signers}"
            )));
        }

        Ok(Self {
            network,
            min_signers,
            max_signers,
            online_nodes: AtomicU16::new(max_signers),
            latency: Duration::ZERO,
            wallets: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashSet::new()),
        })
    }

    /// Delay applied to every request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Takes nodes offline (or back online). Clamped to the node count.
    pub fn set_online_nodes(&self, count: u16) {
        self.online_nodes
            .store(count.min(self.max_signers), Ordering::SeqCst);
    }

    pub fn online_nodes(&self) -> u16 {
        self.online_nodes.load(Ordering::SeqCst)
    }

    /// Number of wallets dealt so far.
    pub fn wallet_count(&self) -> Result<usize, KeyServiceError> {
        Ok(self.wallets.lock().map_err(|_| poisoned())?.len())
    }

    fn authorize(&self, auth: &AuthContext) -> Result<(), KeyServiceError> {
        if auth.network() != self.network {
            return Err(KeyServiceError::Unauthorized(format!(
                "credential scoped to {}, this network is {}",
                auth.network(),
                self.network
            )));
        }

        auth.verify(Utc::now()).map_err(|rejection| match rejection {
            AuthRejection::Expired(_) => KeyServiceError::Expired(rejection.to_string()),
            other => KeyServiceError::Unauthorized(other.to_string()),
        })
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn wallet(&self, wallet_id: &WalletId) -> Result<WalletShares, KeyServiceError> {
        self.wallets
            .lock()
            .map_err(|_| poisoned())?
            .get(wallet_id)
            .cloned()
            .ok_or_else(|| KeyServiceError::UnknownWallet(wallet_id.clone()))
    }

    fn open_session(&self, wallet_id: &WalletId) -> Result<SessionGuard<'_>, KeyServiceError> {
        let mut sessions = self.sessions.lock().map_err(|_| poisoned())?;
        if !sessions.insert(wallet_id.clone()) {
            return Err(KeyServiceError::SessionConflict(wallet_id.clone()));
        }
        Ok(SessionGuard {
            sessions: &self.sessions,
            wallet_id: wallet_id.clone(),
        })
    }
}

/// Closes a signing session when dropped, including on cancellation.
struct SessionGuard<'a> {
    sessions: &'a Mutex<HashSet<WalletId>>,
    wallet_id: WalletId,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&self.wallet_id);
        }
    }
}

fn poisoned() -> KeyServiceError {
    KeyServiceError::Unavailable("node state lock poisoned".into())
}

fn protocol(e: frost::Error) -> KeyServiceError {
    KeyServiceError::Protocol(e.to_string())
}

#[async_trait]
impl ThresholdKeyService for LocalKeyService {
    async fn derive_wallet(&self, auth: &AuthContext) -> Result<WalletKeyInfo, KeyServiceError> {
        self.authorize(auth)?;
        self.simulate_latency().await;

        let (secret_shares, public_key_package) = frost::keys::generate_with_dealer(
            self.max_signers,
            self.min_signers,
            frost::keys::IdentifierList::Default,
            &mut OsRng,
        )
        .map_err(protocol)?;

        let key_packages = secret_shares
            .into_iter()
            .map(|(id, share)| frost::keys::KeyPackage::try_from(share).map(|kp| (id, kp)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(protocol)?;

        let derived_public_key: [u8; 32] = public_key_package.verifying_key().serialize();
        let info = WalletKeyInfo {
            wallet_id: WalletId::new(),
            derived_public_key,
            derived_address: Pubkey::new(derived_public_key),
            controlling_address: auth.identity(),
        };

        self.wallets.lock().map_err(|_| poisoned())?.insert(
            info.wallet_id.clone(),
            WalletShares {
                controller: auth.identity(),
                key_packages,
                public_key_package,
            },
        );

        tracing::debug!(
            wallet_id = %info.wallet_id,
            address = %info.derived_address,
            threshold = self.min_signers,
            nodes = self.max_signers,
            "local network dealt wallet key"
        );
        Ok(info)
    }

    async fn sign(
        &self,
        auth: &AuthContext,
        wallet_id: &WalletId,
        payload: &[u8],
    ) -> Result<SignatureShares, KeyServiceError> {
        self.authorize(auth)?;

        let wallet = self.wallet(wallet_id)?;
        if wallet.controller != auth.identity() {
            return Err(KeyServiceError::Unauthorized(format!(
                "{} does not control wallet {wallet_id}",
                auth.identity()
            )));
        }

        let _session = self.open_session(wallet_id)?;
        self.simulate_latency().await;

        let online = self.online_nodes() as usize;
        let participants: Vec<_> = wallet.key_packages.iter().take(online).collect();

        let mut nonces = BTreeMap::new();
        let mut commitments = BTreeMap::new();
        for (id, key_package) in &participants {
            let (node_nonces, node_commitments) =
                frost::round1::commit(key_package.signing_share(), &mut OsRng);
            nonces.insert(**id, node_nonces);
            commitments.insert(**id, node_commitments);
        }

        let mut shares = BTreeMap::new();
        if participants.len() >= self.min_signers as usize {
            let signing_package = frost::SigningPackage::new(commitments.clone(), payload);
            for (id, key_package) in &participants {
                let node_nonces = nonces
                    .get(*id)
                    .ok_or_else(|| KeyServiceError::Protocol(format!("no nonces for node {id:?}")))?;
                let share = frost::round2::sign(&signing_package, node_nonces, key_package)
                    .map_err(protocol)?;
                shares.insert(**id, share);
            }
        } else {
            tracing::warn!(
                %wallet_id,
                online = participants.len(),
                threshold = self.min_signers,
                "too few nodes online; returning commitments without shares"
            );
        }

        Ok(SignatureShares {
            payload: payload.to_vec(),
            commitments,
            shares,
            public_key_package: wallet.public_key_package,
        })
    }
}
