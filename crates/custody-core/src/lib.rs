//! Threshold custody of Solana wallets controlled by an Ethereum key.
//!
//! The Ethereum key never signs Solana transactions. It signs a short-lived
//! sign-in statement ([`auth::AuthContext`]) that authorizes a threshold
//! network to derive a wallet and to produce FROST signature shares for it.
//! Shares are aggregated and checked locally before anything is broadcast.
//!
//! ```text
//! PrimaryIdentity -> AuthContext -> derive wallet
//!                                -> build tx -> threshold sign -> broadcast | dry run
//! ```

pub mod auth;
pub mod broadcast;
pub mod builder;
pub mod config;
pub mod derivation;
pub mod error;
pub mod key_service;
pub mod logging;
pub mod network;
pub mod rpc;
pub mod signing;
pub mod types;
pub mod wallet;

// ─── Re-exports ──────────────────────────────────────────────────────

pub use auth::{AuthContext, AuthContextBuilder, AuthRejection, PrimaryIdentity};
pub use broadcast::{Broadcaster, TransactionResult};
pub use builder::{TransactionBuilder, UnsignedTransaction};
pub use config::{CustodyConfig, LogFormat, LoggingConfig};
pub use derivation::WalletDerivationManager;
pub use error::{CustodyError, ErrorKind, Failure, Stage};
pub use key_service::{KeyServiceError, LocalKeyService, SignatureShares, ThresholdKeyService};
pub use logging::init_logging;
pub use network::{SolanaNetwork, ThresholdNetwork};
pub use rpc::{HttpSolanaRpc, RecentBlockhash, RpcError, SolanaRpc};
pub use signing::{SignedTransaction, SigningPipeline};
pub use types::{Lamports, TokenBaseUnits, WalletId, WalletKeyInfo};
pub use wallet::{CustodyWallet, NativeTransfer, Operation, OperationOutcome, TokenTransfer};
