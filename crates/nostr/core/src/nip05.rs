//! NIP-05 DNS identifiers: `handle@domain` mapped to a public key by a
//! `/.well-known/nostr.json` document on the domain.
//!
//! Only parsing lives here; fetching the document is left to the caller.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const WELL_KNOWN_PATH: &str = "/.well-known/nostr.json";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Nip05Error {
    #[error("invalid DNS identifier: {0}")]
    InvalidIdentifier(String),

    #[error("failed to validate DNS identifier: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsIdentifier {
    pub handle: String,
    pub domain: String,
}

impl DnsIdentifier {
    pub fn parse(identifier: &str) -> Result<Self, Nip05Error> {
        let invalid = || Nip05Error::InvalidIdentifier(identifier.to_string());

        let mut parts = identifier.trim().split('@');
        let (Some(handle), Some(domain), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if handle.is_empty()
            || domain.is_empty()
            || domain
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#'))
        {
            return Err(invalid());
        }

        Ok(Self {
            handle: handle.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }

    /// `https://<domain>/.well-known/nostr.json?name=<handle>`
    pub fn well_known_url(&self) -> String {
        format!(
            "https://{}{}?name={}",
            self.domain,
            WELL_KNOWN_PATH,
            urlencoding::encode(&self.handle)
        )
    }

    /// Resolve this identifier against a fetched `nostr.json` body.
    pub fn resolve(&self, body: &[u8]) -> Result<DnsIdentifiedUser, Nip05Error> {
        let document: WellKnownDocument = serde_json::from_slice(body)
            .map_err(|error| Nip05Error::ValidationError(error.to_string()))?;

        let public_key = document.names.get(&self.handle).cloned().ok_or_else(|| {
            Nip05Error::ValidationError(format!("{} is not listed on {}", self.handle, self.domain))
        })?;
        let relays = document
            .relays
            .and_then(|mut relays| relays.remove(&public_key))
            .unwrap_or_default();

        Ok(DnsIdentifiedUser { public_key, relays })
    }
}

impl FromStr for DnsIdentifier {
    type Err = Nip05Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DnsIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.handle, self.domain)
    }
}

/// A verified identifier: the key it maps to and the relays it advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsIdentifiedUser {
    pub public_key: String,
    pub relays: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WellKnownDocument {
    names: HashMap<String, String>,
    #[serde(default)]
    relays: Option<HashMap<String, Vec<String>>>,
}
