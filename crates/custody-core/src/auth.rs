//! Primary identity and the AuthContext credential.
//!
//! An AuthContext is an EIP-4361 statement signed with EIP-191 by the
//! primary key. It names the controlling address, a random nonce, an
//! issued-at/expiration window and the threshold network it is valid on.
//! The key service recovers the signer and rejects expired or foreign
//! credentials, so a replayed credential is useless once its window ends.

use std::fmt;
use std::time::Duration;

use chain_eth::{address_of, recover_personal_signer, secret_key_from_hex, sign_personal_message};
use chain_eth::{EthAddress, EthError, SiweMessage};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use k256::SecretKey;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretBox};
use thiserror::Error;
use zeroize::Zeroize;

use crate::error::{CustodyError, Failure, Stage};
use crate::network::{ThresholdNetwork, THRESHOLD_RESOURCE_PREFIX};

const SIWE_DOMAIN: &str = "localhost";
const SIWE_URI: &str = "urn:threshold:session";
const SIWE_STATEMENT: &str = "Authorize threshold wallet derivation and signing.";
const SIWE_CHAIN_ID: u64 = 1;
const NONCE_BYTES: usize = 16;

// ---------------------------------------------------------------------------
// Primary identity
// ---------------------------------------------------------------------------

/// The controlling secp256k1 key. Zeroized on drop and never logged.
pub struct PrimaryIdentity {
    secret: SecretBox<[u8; 32]>,
    address: EthAddress,
}

impl PrimaryIdentity {
    /// Parses a 32-byte hex private key, with or without `0x`.
    pub fn from_hex(input: &str) -> Result<Self, CustodyError> {
        let secret = secret_key_from_hex(input)
            .map_err(|e| Failure::InvalidKeyFormat(e.to_string()).at(Stage::AuthContext))?;
        Ok(Self::from_secret_key(&secret))
    }

    /// A fresh random identity.
    pub fn generate() -> Self {
        Self::from_secret_key(&SecretKey::random(&mut OsRng))
    }

    fn from_secret_key(secret: &SecretKey) -> Self {
        let address = address_of(secret);
        let mut bytes: [u8; 32] = secret.to_bytes().into();
        let secret = SecretBox::new(Box::new(bytes));
        bytes.zeroize();
        Self { secret, address }
    }

    pub fn address(&self) -> EthAddress {
        self.address
    }

    fn sign_personal(&self, message: &[u8]) -> Result<[u8; 65], EthError> {
        let secret = SecretKey::from_bytes(self.secret.expose_secret().into())
            .map_err(|_| EthError::InvalidPrivateKey("stored scalar out of range".into()))?;
        sign_personal_message(message, &secret)
    }
}

impl fmt::Debug for PrimaryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimaryIdentity")
            .field("address", &self.address)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AuthContext
// ---------------------------------------------------------------------------

/// Why a credential was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthRejection {
    #[error("malformed credential: {0}")]
    Malformed(String),

    #[error("signature recovery failed: {0}")]
    BadSignature(String),

    #[error("credential signed by {recovered}, claims {stated}")]
    SignerMismatch {
        stated: EthAddress,
        recovered: EthAddress,
    },

    #[error("credential not valid before {0}")]
    NotYetValid(DateTime<Utc>),

    #[error("credential expired at {0}")]
    Expired(DateTime<Utc>),
}

/// A signed, time-bounded authorization from a primary identity.
///
/// Immutable. Mint one per operation; never share one across concurrent
/// operations.
#[derive(Debug, Clone)]
pub struct AuthContext {
    message: SiweMessage,
    signature: [u8; 65],
    network: ThresholdNetwork,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AuthContext {
    /// Reassembles a credential received from elsewhere. No signature check
    /// happens here; see [`verify`](Self::verify).
    pub fn from_signed(message: SiweMessage, signature: [u8; 65]) -> Result<Self, CustodyError> {
        let malformed = |reason: String| Failure::Unauthorized(reason).at(Stage::AuthContext);

        let network = message
            .resources
            .iter()
            .find_map(|r| r.strip_prefix(THRESHOLD_RESOURCE_PREFIX))
            .ok_or_else(|| malformed("credential names no threshold network".into()))?
            .parse::<ThresholdNetwork>()
            .map_err(|e| malformed(e.to_string()))?;

        let issued_at = parse_timestamp(&message.issued_at).map_err(malformed)?;
        let expires_at = message
            .expiration_time
            .as_deref()
            .ok_or_else(|| malformed("credential has no expiration time".into()))
            .and_then(|t| parse_timestamp(t).map_err(malformed))?;

        Ok(Self {
            message,
            signature,
            network,
            issued_at,
            expires_at,
        })
    }

    /// The address the credential claims to speak for.
    pub fn identity(&self) -> EthAddress {
        self.message.address
    }

    pub fn network(&self) -> ThresholdNetwork {
        self.network
    }

    pub fn nonce(&self) -> &str {
        &self.message.nonce
    }

    pub fn message(&self) -> &SiweMessage {
        &self.message
    }

    pub fn signature(&self) -> &[u8; 65] {
        &self.signature
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, or `None` if already expired.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Recovers the signer, matches it against the stated identity and
    /// checks the validity window.
    pub fn verify(&self, now: DateTime<Utc>) -> Result<(), AuthRejection> {
        if !self.message.has_resource(&self.network.resource()) {
            return Err(AuthRejection::Malformed(format!(
                "resource for {} missing",
                self.network
            )));
        }

        let recovered = recover_personal_signer(&self.message.to_bytes(), &self.signature)
            .map_err(|e| AuthRejection::BadSignature(e.to_string()))?;
        if recovered != self.identity() {
            return Err(AuthRejection::SignerMismatch {
                stated: self.identity(),
                recovered,
            });
        }

        if now < self.issued_at {
            return Err(AuthRejection::NotYetValid(self.issued_at));
        }
        if self.is_expired_at(now) {
            return Err(AuthRejection::Expired(self.expires_at));
        }
        Ok(())
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {value}: {e}"))
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn random_nonce() -> String {
    let mut raw = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Mints AuthContexts scoped to one threshold network.
#[derive(Debug, Clone)]
pub struct AuthContextBuilder {
    network: ThresholdNetwork,
}

impl AuthContextBuilder {
    pub fn new(network: ThresholdNetwork) -> Self {
        Self { network }
    }

    /// Builds a credential valid from now for `validity`.
    pub fn build(
        &self,
        identity: &PrimaryIdentity,
        validity: Duration,
    ) -> Result<AuthContext, CustodyError> {
        self.build_at(identity, validity, Utc::now())
    }

    /// Builds a credential whose window starts at `issued_at`.
    ///
    /// Fails with `ClockSkew` if the window is empty or already over.
    pub fn build_at(
        &self,
        identity: &PrimaryIdentity,
        validity: Duration,
        issued_at: DateTime<Utc>,
    ) -> Result<AuthContext, CustodyError> {
        let skew = |reason: String| Failure::ClockSkew(reason).at(Stage::AuthContext);

        if validity.is_zero() {
            return Err(skew("validity window must be positive".into()));
        }
        let window = chrono::Duration::from_std(validity)
            .map_err(|e| skew(format!("validity window out of range: {e}")))?;

        let issued_at = issued_at.trunc_subsecs(3);
        let expires_at = issued_at
            .checked_add_signed(window)
            .ok_or_else(|| skew("validity window overflows the calendar".into()))?;
        if expires_at <= Utc::now() {
            return Err(skew(format!("window already ended at {expires_at}")));
        }

        let message = SiweMessage {
            domain: SIWE_DOMAIN.into(),
            address: identity.address(),
            statement: Some(SIWE_STATEMENT.into()),
            uri: SIWE_URI.into(),
            version: "1".into(),
            chain_id: SIWE_CHAIN_ID,
            nonce: random_nonce(),
            issued_at: format_timestamp(issued_at),
            expiration_time: Some(format_timestamp(expires_at)),
            resources: vec![self.network.resource()],
        };

        let signature = identity
            .sign_personal(&message.to_bytes())
            .map_err(|e| Failure::InvalidKeyFormat(e.to_string()).at(Stage::AuthContext))?;

        tracing::debug!(
            identity = %identity.address(),
            network = %self.network,
            expires_at = %expires_at,
            "auth context minted"
        );

        Ok(AuthContext {
            message,
            signature,
            network: self.network,
            issued_at,
            expires_at,
        })
    }
}
