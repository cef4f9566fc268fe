//! Threshold signing of unsigned transactions.
//!
//! The message is serialized exactly once. Those bytes are sent to the
//! threshold network, checked against the service's echo, aggregated over
//! and finally prefixed with the signature to form the wire transaction.

use std::sync::Arc;
use std::time::Duration;

use chain_sol::{assemble_wire_transaction, SIGNATURE_LEN};
use chrono::Utc;
use ed25519_dalek::{Signature, VerifyingKey};
use frost_ed25519 as frost;

use crate::auth::AuthContext;
use crate::builder::UnsignedTransaction;
use crate::error::{CustodyError, Failure, Stage};
use crate::key_service::{KeyServiceError, SignatureShares, ThresholdKeyService};
use crate::logging::SECURITY_TARGET;
use crate::network::SolanaNetwork;
use crate::types::{WalletId, WalletKeyInfo};

/// A fully signed transaction, ready to submit or hand back as a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    network: SolanaNetwork,
    wallet_id: WalletId,
    message_bytes: Vec<u8>,
    signature: [u8; SIGNATURE_LEN],
    wire: Vec<u8>,
}

impl SignedTransaction {
    pub fn network(&self) -> SolanaNetwork {
        self.network
    }

    pub fn wallet_id(&self) -> &WalletId {
        &self.wallet_id
    }

    /// The signed message body, byte-identical to what was sent for signing.
    pub fn message_bytes(&self) -> &[u8] {
        &self.message_bytes
    }

    pub fn signature(&self) -> &[u8; SIGNATURE_LEN] {
        &self.signature
    }

    /// Base58 signature, which is also the Solana transaction id.
    pub fn signature_b58(&self) -> String {
        bs58::encode(self.signature).into_string()
    }

    /// The serialized transaction as submitted to the network.
    pub fn wire_bytes(&self) -> &[u8] {
        &self.wire
    }
}

pub struct SigningPipeline {
    service: Arc<dyn ThresholdKeyService>,
    quorum: u16,
    timeout: Duration,
}

impl SigningPipeline {
    pub fn new(service: Arc<dyn ThresholdKeyService>, quorum: u16, timeout: Duration) -> Self {
        Self {
            service,
            quorum,
            timeout,
        }
    }

    /// Signs `tx` with `wallet`'s threshold key.
    ///
    /// Fails with `Unauthorized` without contacting the service when the
    /// credential's identity does not control the wallet. A payload echo that
    /// differs from the bytes sent is a `PayloadMismatch` and is never
    /// recovered from.
    pub async fn sign(
        &self,
        auth: &AuthContext,
        wallet: &WalletKeyInfo,
        tx: &UnsignedTransaction,
    ) -> Result<SignedTransaction, CustodyError> {
        let fail = |failure: Failure| failure.at(Stage::Sign).with_wallet(&wallet.wallet_id);

        if auth.identity() != wallet.controlling_address {
            tracing::warn!(
                wallet_id = %wallet.wallet_id,
                identity = %auth.identity(),
                controller = %wallet.controlling_address,
                "signing refused: identity does not control wallet"
            );
            return Err(fail(Failure::Unauthorized(format!(
                "{} does not control wallet {}",
                auth.identity(),
                wallet.wallet_id
            ))));
        }
        if tx.fee_payer() != &wallet.derived_address || tx.message().num_required_signatures != 1 {
            return Err(fail(Failure::InvalidAddress(format!(
                "transaction must be paid and signed by {} alone",
                wallet.derived_address
            ))));
        }

        let payload = tx.message_bytes();
        let response = self.request_shares(auth, wallet, &payload).await?;

        if response.payload != payload {
            tracing::error!(
                target: SECURITY_TARGET,
                wallet_id = %wallet.wallet_id,
                sent_len = payload.len(),
                echoed_len = response.payload.len(),
                "threshold service echoed a different payload"
            );
            return Err(fail(Failure::PayloadMismatch {
                sent: payload.len(),
                echoed: response.payload.len(),
            }));
        }

        let share_count = response.share_count();
        if share_count < self.quorum as usize {
            tracing::warn!(
                wallet_id = %wallet.wallet_id,
                shares = share_count,
                quorum = self.quorum,
                "not enough signature shares"
            );
            return Err(fail(Failure::SigningFailed(format!(
                "received {share_count} signature shares, quorum is {}",
                self.quorum
            ))));
        }

        let signature = aggregate(&response, &payload, wallet).map_err(fail)?;
        let wire = assemble_wire_transaction(&payload, &[signature])
            .map_err(|e| fail(Failure::SigningFailed(e.to_string())))?;

        let signed = SignedTransaction {
            network: tx.network(),
            wallet_id: wallet.wallet_id.clone(),
            message_bytes: payload,
            signature,
            wire,
        };

        tracing::info!(
            wallet_id = %wallet.wallet_id,
            network = %signed.network,
            signature = %signed.signature_b58(),
            shares = share_count,
            payload_len = signed.message_bytes.len(),
            "transaction signed"
        );
        Ok(signed)
    }

    async fn request_shares(
        &self,
        auth: &AuthContext,
        wallet: &WalletKeyInfo,
        payload: &[u8],
    ) -> Result<SignatureShares, CustodyError> {
        let fail = |failure: Failure| failure.at(Stage::Sign).with_wallet(&wallet.wallet_id);

        let remaining = auth.time_remaining(Utc::now()).ok_or_else(|| {
            fail(Failure::AuthExpired(format!(
                "credential expired at {}",
                auth.expires_at()
            )))
        })?;
        let deadline = self.timeout.min(remaining);

        tracing::debug!(wallet_id = %wallet.wallet_id, payload_len = payload.len(), "requesting signature shares");
        let outcome = tokio::time::timeout(
            deadline,
            self.service.sign(auth, &wallet.wallet_id, payload),
        )
        .await;

        match outcome {
            Ok(Ok(shares)) => Ok(shares),
            Ok(Err(e)) => {
                tracing::warn!(wallet_id = %wallet.wallet_id, error = %e, "signing request rejected");
                Err(fail(match e {
                    KeyServiceError::Unauthorized(reason) => Failure::Unauthorized(reason),
                    KeyServiceError::Expired(reason) => Failure::AuthExpired(reason),
                    other => Failure::SigningFailed(other.to_string()),
                }))
            }
            Err(_) if auth.is_expired_at(Utc::now()) => Err(fail(Failure::AuthExpired(format!(
                "credential expired at {} while signing",
                auth.expires_at()
            )))),
            Err(_) => {
                tracing::warn!(wallet_id = %wallet.wallet_id, ?deadline, "signing timed out");
                Err(fail(Failure::SigningFailed(format!(
                    "no response within {deadline:?}"
                ))))
            }
        }
    }
}

/// Combines the shares over our own copy of the payload and checks the
/// result against the wallet's public key.
fn aggregate(
    response: &SignatureShares,
    payload: &[u8],
    wallet: &WalletKeyInfo,
) -> Result<[u8; SIGNATURE_LEN], Failure> {
    let group_key: [u8; 32] = response.public_key_package.verifying_key().serialize();
    if group_key != wallet.derived_public_key {
        return Err(Failure::SigningFailed(
            "shares belong to a different group key".into(),
        ));
    }

    let package = frost::SigningPackage::new(response.commitments.clone(), payload);
    let signature: [u8; SIGNATURE_LEN] =
        frost::aggregate(&package, &response.shares, &response.public_key_package)
            .map_err(|e| Failure::SigningFailed(format!("aggregation failed: {e}")))?
            .serialize();

    let key = VerifyingKey::from_bytes(&wallet.derived_public_key)
        .map_err(|e| Failure::SigningFailed(format!("wallet key: {e}")))?;
    key.verify_strict(payload, &Signature::from_bytes(&signature))
        .map_err(|e| Failure::SigningFailed(format!("aggregated signature invalid: {e}")))?;

    Ok(signature)
}
