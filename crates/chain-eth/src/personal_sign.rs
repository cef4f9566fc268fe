//! EIP-191 `personal_sign` over arbitrary bytes.
//!
//! The signed digest is
//! `keccak256("\x19Ethereum Signed Message:\n" || len(message) || message)`
//! and signatures are 65 bytes `r || s || v` with `v` in {27, 28}.

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::SecretKey;
use sha3::{Digest, Keccak256};

use crate::address::EthAddress;
use crate::error::EthError;

/// EIP-191 version 0x45 digest of `message`.
pub fn eip191_hash(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Signs `message` with EIP-191 `personal_sign`.
pub fn sign_personal_message(message: &[u8], secret: &SecretKey) -> Result<[u8; 65], EthError> {
    let msg_hash = eip191_hash(message);
    let signing_key = SigningKey::from(secret);

    let (signature, recovery_id): (Signature, RecoveryId) = signing_key
        .sign_prehash(&msg_hash)
        .map_err(|e| EthError::SigningError(e.to_string()))?;

    let mut sig = [0u8; 65];
    sig[..64].copy_from_slice(&signature.to_bytes());
    sig[64] = recovery_id.is_y_odd() as u8 + 27;
    Ok(sig)
}

/// Recovers the address that produced an EIP-191 signature over `message`.
///
/// Accepts `v` as either 0/1 or 27/28.
pub fn recover_personal_signer(message: &[u8], signature: &[u8]) -> Result<EthAddress, EthError> {
    if signature.len() != 65 {
        return Err(EthError::InvalidSignature(format!(
            "expected 65 bytes, got {}",
            signature.len()
        )));
    }

    let v = signature[64];
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_byte(recovery_byte)
        .ok_or_else(|| EthError::InvalidSignature(format!("bad recovery id {v}")))?;

    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| EthError::InvalidSignature(e.to_string()))?;

    let msg_hash = eip191_hash(message);
    let recovered = VerifyingKey::recover_from_prehash(&msg_hash, &sig, recovery_id)
        .map_err(|e| EthError::InvalidSignature(format!("recovery failed: {e}")))?;

    EthAddress::from_uncompressed(recovered.to_encoded_point(false).as_bytes())
}
