//! Solana wire-format support for threshold-held wallets.
//!
//! This crate builds and serializes Solana legacy transactions by hand,
//! without `solana-sdk`. It never holds a private key: messages are
//! serialized here, signed elsewhere (by the threshold network), and the
//! resulting Ed25519 signature is attached to the exact same message bytes.

pub mod address;
pub mod error;
pub mod spl_token;
pub mod system_program;
pub mod transaction;

pub use address::Pubkey;
pub use error::SolError;
pub use spl_token::{
    build_create_associated_token_account, build_spl_transfer, derive_associated_token_address,
    find_program_address, parse_spl_transfer, ASSOCIATED_TOKEN_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
pub use system_program::{build_system_transfer, parse_system_transfer, SYSTEM_PROGRAM_ID};
pub use transaction::{
    assemble_wire_transaction, compile_message, decode_compact_u16, encode_compact_u16,
    serialize_message, split_wire_transaction, CompiledInstruction, Message, SolAccountMeta,
    SolInstruction, SIGNATURE_LEN,
};
