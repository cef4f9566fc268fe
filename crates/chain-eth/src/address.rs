use std::fmt;
use std::str::FromStr;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::EthError;

/// A 20-byte Ethereum account address.
///
/// Displays in EIP-55 mixed-case checksum form. Equality is on the raw bytes,
/// so differently-cased renderings of the same account compare equal once
/// parsed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EthAddress([u8; 20]);

impl EthAddress {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Derives the address of a secp256k1 public key: the last 20 bytes of
    /// Keccak-256 over the 64-byte uncompressed point (without the 0x04 tag).
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let uncompressed = public_key.to_encoded_point(false);
        let hash = Keccak256::digest(&uncompressed.as_bytes()[1..]);

        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Self(bytes)
    }

    /// Derives the address from a raw uncompressed public key (65 bytes,
    /// starting with 0x04).
    pub fn from_uncompressed(uncompressed_pubkey: &[u8]) -> Result<Self, EthError> {
        if uncompressed_pubkey.len() != 65 || uncompressed_pubkey[0] != 0x04 {
            return Err(EthError::InvalidPublicKey(
                "uncompressed key must be 65 bytes starting with 0x04".into(),
            ));
        }

        let public_key = PublicKey::from_sec1_bytes(uncompressed_pubkey)
            .map_err(|e| EthError::InvalidPublicKey(e.to_string()))?;
        Ok(Self::from_public_key(&public_key))
    }

    /// Returns the EIP-55 checksummed `0x` string.
    pub fn to_checksum(&self) -> String {
        apply_checksum(&hex::encode(self.0))
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EthAddress({})", self.to_checksum())
    }
}

impl FromStr for EthAddress {
    type Err = EthError;

    /// Parses a `0x`-prefixed address. Mixed-case input must carry a valid
    /// EIP-55 checksum; all-lowercase or all-uppercase input is accepted as is.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !validate_address(s)? {
            return Err(EthError::InvalidAddress(format!("checksum mismatch for {s}")));
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(&s[2..], &mut bytes)
            .map_err(|e| EthError::InvalidAddress(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for EthAddress {
    type Error = EthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EthAddress> for String {
    fn from(address: EthAddress) -> Self {
        address.to_checksum()
    }
}

/// Validates an Ethereum address string.
///
/// Structural problems (prefix, length, non-hex) are errors. A structurally
/// valid mixed-case address returns `Ok(false)` when its checksum is wrong.
pub fn validate_address(address: &str) -> Result<bool, EthError> {
    let hex_part = strip_and_check(address)?;

    let is_all_lower = hex_part.chars().all(|c| !c.is_ascii_uppercase());
    let is_all_upper = hex_part.chars().all(|c| !c.is_ascii_lowercase());

    if is_all_lower || is_all_upper {
        return Ok(true);
    }

    Ok(apply_checksum(&hex_part.to_lowercase())[2..] == *hex_part)
}

/// Applies EIP-55 mixed-case checksum encoding to an Ethereum address.
pub fn checksum_address(address: &str) -> Result<String, EthError> {
    let hex_part = strip_and_check(address)?;
    Ok(apply_checksum(&hex_part.to_lowercase()))
}

fn strip_and_check(address: &str) -> Result<&str, EthError> {
    let hex_part = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| EthError::InvalidAddress("address must start with 0x".into()))?;

    if hex_part.len() != 40 {
        return Err(EthError::InvalidAddress(format!(
            "expected 40 hex characters, got {}",
            hex_part.len()
        )));
    }

    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(EthError::InvalidAddress(
            "address contains non-hex characters".into(),
        ));
    }

    Ok(hex_part)
}

/// `lower_hex` must be 40 lowercase hex characters without prefix.
fn apply_checksum(lower_hex: &str) -> String {
    let hash = Keccak256::digest(lower_hex.as_bytes());

    let mut checksummed = String::with_capacity(42);
    checksummed.push_str("0x");

    for (i, c) in lower_hex.chars().enumerate() {
        // High nibble for even positions, low nibble for odd ones.
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            checksummed.push(c.to_ascii_uppercase());
        } else {
            checksummed.push(c);
        }
    }

    checksummed
}
