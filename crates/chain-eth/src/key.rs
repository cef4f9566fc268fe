use k256::SecretKey;
use zeroize::Zeroize;

use crate::address::EthAddress;
use crate::error::EthError;

/// Parses a secp256k1 private key from 64 hex characters (an optional `0x`
/// prefix is allowed). Rejects zero and out-of-range scalars.
pub fn secret_key_from_hex(input: &str) -> Result<SecretKey, EthError> {
    let trimmed = input.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if hex_part.len() != 64 {
        return Err(EthError::InvalidPrivateKey(format!(
            "expected 64 hex characters, got {}",
            hex_part.len()
        )));
    }

    let mut bytes = [0u8; 32];
    hex::decode_to_slice(hex_part, &mut bytes)
        .map_err(|e| EthError::InvalidPrivateKey(e.to_string()))?;

    let secret = SecretKey::from_bytes((&bytes).into())
        .map_err(|_| EthError::InvalidPrivateKey("scalar out of range".into()));
    bytes.zeroize();
    secret
}

/// Address controlled by `secret`.
pub fn address_of(secret: &SecretKey) -> EthAddress {
    EthAddress::from_public_key(&secret.public_key())
}
