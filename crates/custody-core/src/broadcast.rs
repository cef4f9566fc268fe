//! Submission of signed transactions.
//!
//! No automatic retries: a submission that timed out on our side may still
//! land, and resubmitting a token transfer blindly risks paying twice.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::{CustodyError, Failure, Stage};
use crate::network::SolanaNetwork;
use crate::rpc::SolanaRpc;
use crate::signing::SignedTransaction;

/// Outcome of a send: either a network transaction id or, for a dry run,
/// the signed bytes that would have been submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransactionResult {
    Submitted {
        signature: String,
        explorer_url: String,
    },
    DryRun {
        signature: String,
        #[serde(with = "base64_bytes")]
        signed_bytes: Vec<u8>,
    },
}

impl TransactionResult {
    pub fn signature(&self) -> &str {
        match self {
            TransactionResult::Submitted { signature, .. }
            | TransactionResult::DryRun { signature, .. } => signature,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, TransactionResult::DryRun { .. })
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

pub struct Broadcaster {
    rpc: Arc<dyn SolanaRpc>,
    timeout: Duration,
}

impl Broadcaster {
    pub fn new(rpc: Arc<dyn SolanaRpc>, timeout: Duration) -> Self {
        Self { rpc, timeout }
    }

    /// Submits `signed` to `network`, or returns its bytes untouched when
    /// `broadcast` is false.
    pub async fn submit(
        &self,
        signed: &SignedTransaction,
        network: SolanaNetwork,
        broadcast: bool,
    ) -> Result<TransactionResult, CustodyError> {
        let fail = |failure: Failure| failure.at(Stage::Broadcast).with_wallet(signed.wallet_id());

        if signed.network() != network {
            return Err(fail(Failure::NetworkMismatch {
                expected: signed.network().to_string(),
                actual: network.to_string(),
            }));
        }

        let signature = signed.signature_b58();
        if !broadcast {
            tracing::info!(
                wallet_id = %signed.wallet_id(),
                %network,
                %signature,
                "dry run; transaction not submitted"
            );
            return Ok(TransactionResult::DryRun {
                signature,
                signed_bytes: signed.wire_bytes().to_vec(),
            });
        }

        let outcome =
            tokio::time::timeout(self.timeout, self.rpc.send_transaction(signed.wire_bytes(), network))
                .await;

        let txid = match outcome {
            Ok(Ok(txid)) => txid,
            Ok(Err(e)) => {
                tracing::warn!(wallet_id = %signed.wallet_id(), %network, error = %e, "submission failed");
                return Err(fail(Failure::BroadcastFailed(e.to_string())));
            }
            Err(_) => {
                tracing::warn!(
                    wallet_id = %signed.wallet_id(),
                    %network,
                    %signature,
                    "submission timed out; transaction may still land"
                );
                return Err(fail(Failure::BroadcastFailed(format!(
                    "no response within {:?}; check {signature} before resending",
                    self.timeout
                ))));
            }
        };

        if txid != signature {
            tracing::warn!(%txid, expected = %signature, "rpc returned an unexpected transaction id");
        }

        tracing::info!(
            wallet_id = %signed.wallet_id(),
            %network,
            signature = %txid,
            "transaction submitted"
        );
        Ok(TransactionResult::Submitted {
            explorer_url: network.explorer_tx_url(&txid),
            signature: txid,
        })
    }
}
