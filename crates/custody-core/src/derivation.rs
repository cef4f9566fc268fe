//! Wallet derivation.
//!
//! Every call mints a new wallet; nothing is deduplicated or cached here.
//! Callers persist the returned `wallet_id`. There are no internal retries
//! because a failed-looking attempt may already have minted a wallet.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::auth::AuthContext;
use crate::error::{CustodyError, Failure, Stage};
use crate::key_service::{KeyServiceError, ThresholdKeyService};
use crate::types::WalletKeyInfo;

pub struct WalletDerivationManager {
    service: Arc<dyn ThresholdKeyService>,
    timeout: Duration,
}

impl WalletDerivationManager {
    pub fn new(service: Arc<dyn ThresholdKeyService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// Asks the threshold network for a new wallet controlled by the
    /// credential's identity.
    ///
    /// The deadline is the shorter of the request timeout and the
    /// credential's remaining validity. If the credential lapses before the
    /// service answers, the call fails with `AuthExpired` even if a wallet was
    /// minted; the error then carries that wallet's id.
    pub async fn derive_wallet(&self, auth: &AuthContext) -> Result<WalletKeyInfo, CustodyError> {
        let remaining = auth.time_remaining(Utc::now()).ok_or_else(|| {
            Failure::AuthExpired(format!("credential expired at {}", auth.expires_at()))
                .at(Stage::DeriveWallet)
        })?;
        let deadline = self.timeout.min(remaining);

        let outcome = tokio::time::timeout(deadline, self.service.derive_wallet(auth)).await;

        let info = match outcome {
            Err(_) if auth.is_expired_at(Utc::now()) => {
                tracing::warn!(identity = %auth.identity(), "credential expired during derivation");
                return Err(Failure::AuthExpired(format!(
                    "credential expired at {} before derivation completed",
                    auth.expires_at()
                ))
                .at(Stage::DeriveWallet));
            }
            Err(_) => {
                tracing::warn!(identity = %auth.identity(), ?deadline, "derivation timed out");
                return Err(Failure::DerivationFailed(format!(
                    "no response within {deadline:?}"
                ))
                .at(Stage::DeriveWallet));
            }
            Ok(Err(e)) => {
                tracing::warn!(identity = %auth.identity(), error = %e, "derivation rejected");
                return Err(map_service_error(e));
            }
            Ok(Ok(info)) => info,
        };

        if auth.is_expired_at(Utc::now()) {
            tracing::warn!(
                wallet_id = %info.wallet_id,
                "credential expired before derivation completed; wallet was minted"
            );
            return Err(Failure::AuthExpired(format!(
                "credential expired at {} before derivation completed",
                auth.expires_at()
            ))
            .at(Stage::DeriveWallet)
            .with_wallet(&info.wallet_id));
        }

        if info.controlling_address != auth.identity() {
            return Err(Failure::DerivationFailed(format!(
                "service bound wallet to {}, expected {}",
                info.controlling_address,
                auth.identity()
            ))
            .at(Stage::DeriveWallet)
            .with_wallet(&info.wallet_id));
        }
        if info.derived_address.to_bytes() != info.derived_public_key {
            return Err(Failure::DerivationFailed(
                "derived address does not encode the derived public key".into(),
            )
            .at(Stage::DeriveWallet)
            .with_wallet(&info.wallet_id));
        }

        tracing::info!(
            wallet_id = %info.wallet_id,
            address = %info.derived_address,
            controller = %info.controlling_address,
            "wallet derived"
        );
        Ok(info)
    }
}

fn map_service_error(e: KeyServiceError) -> CustodyError {
    let failure = match e {
        KeyServiceError::Unauthorized(reason) => Failure::Unauthorized(reason),
        KeyServiceError::Expired(reason) => Failure::AuthExpired(reason),
        other => Failure::DerivationFailed(other.to_string()),
    };
    failure.at(Stage::DeriveWallet)
}
