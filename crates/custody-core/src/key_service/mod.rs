//! The threshold key service boundary.
//!
//! The service owns the key shares. Callers only ever see public material:
//! the derived public key at derivation time, and per-node FROST signature
//! shares over a payload at signing time. Aggregation happens on the caller
//! side so the caller can check the shares against the exact bytes it sent.

mod local;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use frost_ed25519 as frost;
use thiserror::Error;

use crate::auth::AuthContext;
use crate::types::{WalletId, WalletKeyInfo};

pub use local::LocalKeyService;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyServiceError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("credential expired: {0}")]
    Expired(String),

    #[error("unknown wallet: {0}")]
    UnknownWallet(WalletId),

    #[error("signing session already open for wallet {0}")]
    SessionConflict(WalletId),

    #[error("threshold protocol error: {0}")]
    Protocol(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// What the threshold network returns for one signing request.
#[derive(Debug, Clone)]
pub struct SignatureShares {
    /// The payload as the service received it.
    pub payload: Vec<u8>,
    /// Round-one commitments of every participating node.
    pub commitments: BTreeMap<frost::Identifier, frost::round1::SigningCommitments>,
    /// Round-two shares. May be fewer than `commitments` if nodes dropped out.
    pub shares: BTreeMap<frost::Identifier, frost::round2::SignatureShare>,
    /// Group key plus per-node verifying shares, used to check each share.
    pub public_key_package: frost::keys::PublicKeyPackage,
}

impl SignatureShares {
    pub fn share_count(&self) -> usize {
        self.shares.len()
    }
}

/// A threshold network that derives wallets and signs on their behalf.
///
/// Concurrent `sign` calls for the same wallet may be rejected with
/// [`KeyServiceError::SessionConflict`]; callers serialize them.
#[async_trait]
pub trait ThresholdKeyService: Send + Sync {
    /// Mints a new wallet controlled by the credential's identity.
    async fn derive_wallet(&self, auth: &AuthContext) -> Result<WalletKeyInfo, KeyServiceError>;

    /// Produces signature shares over `payload` with the wallet's key.
    async fn sign(
        &self,
        auth: &AuthContext,
        wallet_id: &WalletId,
        payload: &[u8],
    ) -> Result<SignatureShares, KeyServiceError>;
}

#[async_trait]
impl<T: ThresholdKeyService + ?Sized> ThresholdKeyService for Arc<T> {
    async fn derive_wallet(&self, auth: &AuthContext) -> Result<WalletKeyInfo, KeyServiceError> {
        (**self).derive_wallet(auth).await
    }

    async fn sign(
        &self,
        auth: &AuthContext,
        wallet_id: &WalletId,
        payload: &[u8],
    ) -> Result<SignatureShares, KeyServiceError> {
        (**self).sign(auth, wallet_id, payload).await
    }
}
