//! Custody configuration.
//!
//! Loaded from a TOML document or from `CUSTODY_*` environment variables.
//! Network names are kept as strings and only resolved when an operation
//! runs, so an unknown network fails that operation rather than startup.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CustodyError, Failure, Stage};
use crate::network::{SolanaNetwork, ThresholdNetwork};

pub const ENV_SOLANA_NETWORK: &str = "CUSTODY_SOLANA_NETWORK";
pub const ENV_THRESHOLD_NETWORK: &str = "CUSTODY_THRESHOLD_NETWORK";
pub const ENV_RPC_URL: &str = "CUSTODY_RPC_URL";
pub const ENV_QUORUM: &str = "CUSTODY_QUORUM";
pub const ENV_AUTH_VALIDITY_SECS: &str = "CUSTODY_AUTH_VALIDITY_SECS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "CUSTODY_REQUEST_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "CUSTODY_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "CUSTODY_LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodyConfig {
    /// Default destination cluster.
    pub solana_network: String,
    /// Threshold network AuthContexts are scoped to.
    pub threshold_network: String,
    /// Overrides the cluster's public RPC endpoint.
    pub rpc_url: Option<String>,
    /// Minimum signature shares required before aggregation.
    pub quorum: u16,
    pub auth_validity_secs: u64,
    /// Deadline for each external call.
    pub request_timeout_ms: u64,
    pub logging: LoggingConfig,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            solana_network: SolanaNetwork::Devnet.as_str().into(),
            threshold_network: ThresholdNetwork::DatilDev.as_str().into(),
            rpc_url: None,
            quorum: 2,
            auth_validity_secs: 600,
            request_timeout_ms: 30_000,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

impl CustodyConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, CustodyError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| Failure::InvalidConfig(e.to_string()).at(Stage::Config))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, CustodyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Failure::InvalidConfig(format!("cannot read {}: {e}", path.display())).at(Stage::Config)
        })?;
        Self::from_toml_str(&text)
    }

    /// Defaults overridden by whichever `CUSTODY_*` variables are set.
    pub fn from_env() -> Result<Self, CustodyError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CustodyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_SOLANA_NETWORK) {
            config.solana_network = v;
        }
        if let Some(v) = lookup(ENV_THRESHOLD_NETWORK) {
            config.threshold_network = v;
        }
        if let Some(v) = lookup(ENV_RPC_URL) {
            config.rpc_url = Some(v).filter(|url| !url.is_empty());
        }
        if let Some(v) = lookup(ENV_QUORUM) {
            config.quorum = parse_var(ENV_QUORUM, &v)?;
        }
        if let Some(v) = lookup(ENV_AUTH_VALIDITY_SECS) {
            config.auth_validity_secs = parse_var(ENV_AUTH_VALIDITY_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout_ms = parse_var(ENV_REQUEST_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_LOG_LEVEL) {
            config.logging.level = v;
        }
        if let Some(v) = lookup(ENV_LOG_FORMAT) {
            config.logging.format = match v.to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                other => {
                    return Err(Failure::InvalidConfig(format!(
                        "{ENV_LOG_FORMAT} must be text or json, got {other}"
                    ))
                    .at(Stage::Config))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks numeric bounds. Network names are resolved later.
    pub fn validate(&self) -> Result<(), CustodyError> {
        let invalid = |reason: &str| Err(Failure::InvalidConfig(reason.into()).at(Stage::Config));

        if self.quorum == 0 {
            return invalid("quorum must be at least 1");
        }
        if self.auth_validity_secs == 0 {
            return invalid("auth_validity_secs must be positive");
        }
        if self.request_timeout_ms == 0 {
            return invalid("request_timeout_ms must be positive");
        }
        Ok(())
    }

    pub fn solana_network(&self) -> Result<SolanaNetwork, Failure> {
        Ok(self.solana_network.parse::<SolanaNetwork>()?)
    }

    pub fn threshold_network(&self) -> Result<ThresholdNetwork, Failure> {
        Ok(self.threshold_network.parse::<ThresholdNetwork>()?)
    }

    pub fn auth_validity(&self) -> Duration {
        Duration::from_secs(self.auth_validity_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, CustodyError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Failure::InvalidConfig(format!("{key}: {e}")).at(Stage::Config))
}
