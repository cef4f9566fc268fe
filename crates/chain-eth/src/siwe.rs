//! EIP-4361 "Sign-In with Ethereum" statements.
//!
//! Only the fields the custody flow needs are modelled: domain, address,
//! statement, URI, version, chain id, nonce, issued-at, expiration-time and
//! resources. Timestamps are kept as the RFC 3339 strings that appear in the
//! signed text so the rendered message is byte-stable.
//!
//! ```text
//! {domain} wants you to sign in with your Ethereum account:
//! {address}
//!
//! {statement}
//!
//! URI: {uri}
//! Version: 1
//! Chain ID: {chain_id}
//! Nonce: {nonce}
//! Issued At: {issued_at}
//! Expiration Time: {expiration_time}
//! Resources:
//! - {resource}
//! ```

use std::fmt;
use std::str::FromStr;

use crate::address::EthAddress;
use crate::error::EthError;

const HEADER_SUFFIX: &str = " wants you to sign in with your Ethereum account:";
const URI_TAG: &str = "URI: ";
const VERSION_TAG: &str = "Version: ";
const CHAIN_ID_TAG: &str = "Chain ID: ";
const NONCE_TAG: &str = "Nonce: ";
const ISSUED_AT_TAG: &str = "Issued At: ";
const EXPIRATION_TAG: &str = "Expiration Time: ";
const RESOURCES_TAG: &str = "Resources:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiweMessage {
    pub domain: String,
    pub address: EthAddress,
    pub statement: Option<String>,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: String,
    pub expiration_time: Option<String>,
    pub resources: Vec<String>,
}

impl SiweMessage {
    /// The exact bytes that get signed.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Whether `resource` is listed in the message's resources.
    pub fn has_resource(&self, resource: &str) -> bool {
        self.resources.iter().any(|r| r == resource)
    }
}

impl fmt::Display for SiweMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}{HEADER_SUFFIX}", self.domain)?;
        writeln!(f, "{}", self.address)?;
        writeln!(f)?;
        if let Some(statement) = &self.statement {
            writeln!(f, "{statement}")?;
        }
        writeln!(f)?;
        writeln!(f, "{URI_TAG}{}", self.uri)?;
        writeln!(f, "{VERSION_TAG}{}", self.version)?;
        writeln!(f, "{CHAIN_ID_TAG}{}", self.chain_id)?;
        writeln!(f, "{NONCE_TAG}{}", self.nonce)?;
        write!(f, "{ISSUED_AT_TAG}{}", self.issued_at)?;
        if let Some(expiration) = &self.expiration_time {
            write!(f, "\n{EXPIRATION_TAG}{expiration}")?;
        }
        if !self.resources.is_empty() {
            write!(f, "\n{RESOURCES_TAG}")?;
            for resource in &self.resources {
                write!(f, "\n- {resource}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for SiweMessage {
    type Err = EthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s.split('\n').peekable();

        let header = next_line(&mut lines, "header")?;
        let domain = header
            .strip_suffix(HEADER_SUFFIX)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| malformed("missing sign-in header"))?
            .to_string();

        let address: EthAddress = next_line(&mut lines, "address")?.parse()?;

        if !next_line(&mut lines, "blank line after address")?.is_empty() {
            return Err(malformed("expected blank line after address"));
        }

        // Either "{statement}\n\n" or a single extra blank line.
        let statement = match next_line(&mut lines, "statement")? {
            "" => None,
            text => {
                if !next_line(&mut lines, "blank line after statement")?.is_empty() {
                    return Err(malformed("expected blank line after statement"));
                }
                Some(text.to_string())
            }
        };

        let uri = tagged(next_line(&mut lines, "URI")?, URI_TAG)?.to_string();
        let version = tagged(next_line(&mut lines, "version")?, VERSION_TAG)?.to_string();
        if version != "1" {
            return Err(malformed("unsupported version"));
        }
        let chain_id = tagged(next_line(&mut lines, "chain id")?, CHAIN_ID_TAG)?
            .parse::<u64>()
            .map_err(|e| malformed(&format!("bad chain id: {e}")))?;
        let nonce = tagged(next_line(&mut lines, "nonce")?, NONCE_TAG)?.to_string();
        if nonce.len() < 8 || !nonce.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(malformed("nonce must be at least 8 alphanumeric characters"));
        }
        let issued_at = tagged(next_line(&mut lines, "issued at")?, ISSUED_AT_TAG)?.to_string();

        let mut expiration_time = None;
        if let Some(line) = lines.peek() {
            if let Some(value) = line.strip_prefix(EXPIRATION_TAG) {
                expiration_time = Some(value.to_string());
                lines.next();
            }
        }

        let mut resources = Vec::new();
        if let Some(line) = lines.next() {
            if line != RESOURCES_TAG {
                return Err(malformed(&format!("unexpected line: {line}")));
            }
            for line in lines {
                let resource = line
                    .strip_prefix("- ")
                    .ok_or_else(|| malformed("resource lines must start with '- '"))?;
                resources.push(resource.to_string());
            }
        }

        Ok(Self {
            domain,
            address,
            statement,
            uri,
            version,
            chain_id,
            nonce,
            issued_at,
            expiration_time,
            resources,
        })
    }
}

fn next_line<'a, I>(lines: &mut I, what: &str) -> Result<&'a str, EthError>
where
    I: Iterator<Item = &'a str>,
{
    lines
        .next()
        .ok_or_else(|| malformed(&format!("message ended before {what}")))
}

fn tagged<'a>(line: &'a str, tag: &str) -> Result<&'a str, EthError> {
    line.strip_prefix(tag)
        .ok_or_else(|| malformed(&format!("expected '{}'", tag.trim_end())))
}

fn malformed(reason: &str) -> EthError {
    EthError::MalformedMessage(reason.to_string())
}
