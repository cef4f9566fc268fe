use std::fmt;

use thiserror::Error;

use crate::types::WalletId;

/// Where in the custody flow a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    AuthContext,
    DeriveWallet,
    BuildNativeTransfer,
    BuildTokenTransfer,
    Sign,
    Broadcast,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Config => "load_config",
            Stage::AuthContext => "build_auth_context",
            Stage::DeriveWallet => "derive_wallet",
            Stage::BuildNativeTransfer => "build_native_transfer",
            Stage::BuildTokenTransfer => "build_token_transfer",
            Stage::Sign => "sign_transaction",
            Stage::Broadcast => "submit_transaction",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure class, used by callers to decide what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed caller input. Never retried.
    InvalidInput,
    /// Credential rejected. Rebuild the AuthContext before trying again.
    AuthFailure,
    /// Collaborator failure.
    ServiceFailure,
    /// Tampering or a protocol bug. Fatal.
    ProtocolViolation,
}

#[derive(Debug, Error)]
pub enum Failure {
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("clock skew: {0}")]
    ClockSkew(String),

    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("unknown mint: {0}")]
    UnknownMint(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("network mismatch: transaction built for {expected}, submitted to {actual}")]
    NetworkMismatch { expected: String, actual: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("auth context expired: {0}")]
    AuthExpired(String),

    #[error("wallet derivation failed: {0}")]
    DerivationFailed(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("payload mismatch: sent {sent} bytes, service echoed {echoed} bytes that differ")]
    PayloadMismatch { sent: usize, echoed: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Failure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Failure::InvalidKeyFormat(_)
            | Failure::ClockSkew(_)
            | Failure::InvalidAmount
            | Failure::InvalidAddress(_)
            | Failure::UnknownMint(_)
            | Failure::UnknownNetwork(_)
            | Failure::NetworkMismatch { .. }
            | Failure::InvalidConfig(_) => ErrorKind::InvalidInput,
            Failure::Unauthorized(_) | Failure::AuthExpired(_) => ErrorKind::AuthFailure,
            Failure::DerivationFailed(_)
            | Failure::SigningFailed(_)
            | Failure::NetworkUnavailable(_)
            | Failure::BroadcastFailed(_) => ErrorKind::ServiceFailure,
            Failure::PayloadMismatch { .. } => ErrorKind::ProtocolViolation,
        }
    }

    /// Attaches the stage this failure happened in.
    pub fn at(self, stage: Stage) -> CustodyError {
        CustodyError {
            stage,
            wallet_id: None,
            failure: self,
        }
    }
}

/// A failure plus the context a caller needs to decide on a retry.
#[derive(Debug, Error)]
#[error("{stage}: {failure}")]
pub struct CustodyError {
    stage: Stage,
    wallet_id: Option<WalletId>,
    failure: Failure,
}

impl CustodyError {
    pub fn with_wallet(mut self, wallet_id: &WalletId) -> Self {
        self.wallet_id = Some(wallet_id.clone());
        self
    }

    pub fn operation(&self) -> Stage {
        self.stage
    }

    pub fn wallet_id(&self) -> Option<&WalletId> {
        self.wallet_id.as_ref()
    }

    pub fn failure(&self) -> &Failure {
        &self.failure
    }

    pub fn kind(&self) -> ErrorKind {
        self.failure.kind()
    }

    /// Whether retrying the same call can succeed without caller bookkeeping.
    ///
    /// Derivation, signing and broadcast failures are excluded: an earlier
    /// attempt may already have minted a wallet or landed a transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::AuthFailure)
            || matches!(self.failure, Failure::NetworkUnavailable(_))
    }
}
