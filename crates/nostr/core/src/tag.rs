//! Event tags.
//!
//! On the wire a tag is an array of strings whose first element names it.
//! Known names decode into typed variants, everything else is kept verbatim
//! in [`Tag::Generic`]. Encoding is the exact inverse of decoding: optional
//! trailing fields are omitted when absent, never written as `null`.
//!
//! A known tag that carries more elements than its variant models (for
//! example an `e` tag with a NIP-10 marker) is also kept as `Generic`, so
//! re-serializing an event never changes its id.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EVENT: &str = "e";
pub const PUBLIC_KEY: &str = "p";
pub const NONCE: &str = "nonce";
pub const DELEGATION: &str = "delegation";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("tag is empty")]
    Empty,

    #[error("`{tag}` tag is missing its {field}")]
    MissingField {
        tag: &'static str,
        field: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    /// `["e", <event id>, <relay url>?]`
    EventRef {
        event_id: String,
        relay_url: Option<String>,
    },
    /// `["p", <pubkey>, <relay url>?]`
    PubkeyRef {
        pubkey: String,
        relay_url: Option<String>,
    },
    /// NIP-13 proof of work: `["nonce", <leading zeroes>, <target difficulty>]`
    Nonce {
        leading_zero_count: String,
        target_difficulty: String,
    },
    /// NIP-26: `["delegation", <delegator pubkey>, <conditions>, <signature>]`
    Delegation {
        delegator_pubkey: String,
        conditions_query: String,
        signature: String,
    },
    Generic {
        name: String,
        values: Vec<String>,
    },
}

impl Tag {
    pub fn event(event_id: impl Into<String>) -> Self {
        Self::EventRef {
            event_id: event_id.into(),
            relay_url: None,
        }
    }

    pub fn pubkey(pubkey: impl Into<String>) -> Self {
        Self::PubkeyRef {
            pubkey: pubkey.into(),
            relay_url: None,
        }
    }

    pub fn generic(name: impl Into<String>, values: Vec<String>) -> Self {
        Self::Generic {
            name: name.into(),
            values,
        }
    }

    /// The type string that leads the encoded array.
    pub fn name(&self) -> &str {
        match self {
            Self::EventRef { .. } => EVENT,
            Self::PubkeyRef { .. } => PUBLIC_KEY,
            Self::Nonce { .. } => NONCE,
            Self::Delegation { .. } => DELEGATION,
            Self::Generic { name, .. } => name,
        }
    }

    /// Decode from the raw wire array.
    pub fn from_parts(parts: Vec<String>) -> Result<Self, TagError> {
        let mut iter = parts.into_iter();
        let name = iter.next().ok_or(TagError::Empty)?;
        let rest: Vec<String> = iter.collect();

        let tag = match (name.as_str(), rest.len()) {
            (EVENT, 1 | 2) => {
                let mut fields = rest.into_iter();
                Self::EventRef {
                    event_id: fields.next().unwrap_or_default(),
                    relay_url: fields.next(),
                }
            }
            (EVENT, 0) => {
                return Err(TagError::MissingField {
                    tag: EVENT,
                    field: "event id",
                });
            }
            (PUBLIC_KEY, 1 | 2) => {
                let mut fields = rest.into_iter();
                Self::PubkeyRef {
                    pubkey: fields.next().unwrap_or_default(),
                    relay_url: fields.next(),
                }
            }
            (PUBLIC_KEY, 0) => {
                return Err(TagError::MissingField {
                    tag: PUBLIC_KEY,
                    field: "public key",
                });
            }
            (NONCE, 2) => {
                let [leading_zero_count, target_difficulty] = take_fields(rest)?;
                Self::Nonce {
                    leading_zero_count,
                    target_difficulty,
                }
            }
            (NONCE, 0 | 1) => {
                return Err(TagError::MissingField {
                    tag: NONCE,
                    field: "target difficulty",
                });
            }
            (DELEGATION, 3) => {
                let [delegator_pubkey, conditions_query, signature] = take_fields(rest)?;
                Self::Delegation {
                    delegator_pubkey,
                    conditions_query,
                    signature,
                }
            }
            (DELEGATION, 0..=2) => {
                return Err(TagError::MissingField {
                    tag: DELEGATION,
                    field: "delegation token",
                });
            }
            _ => Self::Generic { name, values: rest },
        };
        Ok(tag)
    }

    /// Encode into the raw wire array.
    pub fn to_parts(&self) -> Vec<String> {
        let mut parts = vec![self.name().to_string()];
        match self {
            Self::EventRef {
                event_id: value,
                relay_url,
            }
            | Self::PubkeyRef {
                pubkey: value,
                relay_url,
            } => {
                parts.push(value.clone());
                parts.extend(relay_url.iter().cloned());
            }
            Self::Nonce {
                leading_zero_count,
                target_difficulty,
            } => {
                parts.push(leading_zero_count.clone());
                parts.push(target_difficulty.clone());
            }
            Self::Delegation {
                delegator_pubkey,
                conditions_query,
                signature,
            } => {
                parts.push(delegator_pubkey.clone());
                parts.push(conditions_query.clone());
                parts.push(signature.clone());
            }
            Self::Generic { values, .. } => parts.extend(values.iter().cloned()),
        }
        parts
    }
}

fn take_fields<const N: usize>(rest: Vec<String>) -> Result<[String; N], TagError> {
    <[String; N]>::try_from(rest).map_err(|_| TagError::Empty)
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let parts = self.to_parts();
        let mut seq = serializer.serialize_seq(Some(parts.len()))?;
        for part in &parts {
            seq.serialize_element(part)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parts = Vec::<String>::deserialize(deserializer)?;
        Self::from_parts(parts).map_err(de::Error::custom)
    }
}
