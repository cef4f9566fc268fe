//! Ethereum-side primitives for the custody orchestrator.
//!
//! The controlling identity of every derived wallet is an Ethereum account.
//! This crate provides:
//! - secp256k1 private key parsing and EIP-55 checksummed addresses
//! - EIP-191 `personal_sign` signing and signer recovery
//! - EIP-4361 (Sign-In with Ethereum) statements used as authorization bodies

pub mod address;
pub mod error;
pub mod key;
pub mod personal_sign;
pub mod siwe;

pub use address::{checksum_address, validate_address, EthAddress};
pub use error::EthError;
pub use key::{address_of, secret_key_from_hex};
pub use personal_sign::{eip191_hash, recover_personal_signer, sign_personal_message};
pub use siwe::SiweMessage;
