//! Signed events: canonical serialization, id derivation, signing and
//! validation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::hex;
use crate::keys::{self, KeyPair, KeysError};
use crate::kind::Kind;
use crate::tag::Tag;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("failed to decode event: {0}")]
    DecodingFailed(String),

    #[error("failed to encode event: {0}")]
    EncodingFailed(String),

    #[error("failed to sign event: {0}")]
    SigningFailed(#[from] KeysError),

    #[error("event id does not match its contents")]
    InvalidEventId,

    #[error("event signature does not verify")]
    InvalidSignature,
}

/// An event before it is signed. The id is a pure function of these fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub public_key: String,
    pub created_at: i64,
    pub kind: Kind,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl UnsignedEvent {
    /// Stamp the current time and the signer's public key.
    pub fn new(keys: &KeyPair, kind: Kind, tags: Vec<Tag>, content: impl Into<String>) -> Self {
        Self {
            public_key: keys.public_key_hex(),
            created_at: now(),
            kind,
            tags,
            content: content.into(),
        }
    }

    pub fn id(&self) -> Result<[u8; 32], EventError> {
        compute_id(
            &self.public_key,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    pub fn sign(self, keys: &KeyPair) -> Result<Event, EventError> {
        let id = self.id()?;
        let signature = keys.sign(&id)?;
        Ok(Event {
            id: hex::encode(id),
            public_key: self.public_key,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            signature: hex::encode(signature),
        })
    }
}

/// A signed event as it travels on the wire.
///
/// Two events are the same event when their ids match; the other fields
/// do not take part in equality or hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "pubkey")]
    pub public_key: String,
    pub created_at: i64,
    pub kind: Kind,
    pub tags: Vec<Tag>,
    pub content: String,
    #[serde(rename = "sig")]
    pub signature: String,
}

impl Event {
    /// Build, hash and sign a new event dated now.
    pub fn create(
        keys: &KeyPair,
        kind: Kind,
        tags: Vec<Tag>,
        content: impl Into<String>,
    ) -> Result<Self, EventError> {
        UnsignedEvent::new(keys, kind, tags, content).sign(keys)
    }

    /// Check the id first, then the signature.
    pub fn validate(&self) -> Result<(), EventError> {
        let expected = compute_id(
            &self.public_key,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        // Exact lowercase hex only; other spellings of the same hash are distinct ids.
        if self.id != hex::encode(expected) {
            return Err(EventError::InvalidEventId);
        }

        let signature = hex::decode(&self.signature).map_err(|_| EventError::InvalidSignature)?;
        let public_key =
            hex::decode(&self.public_key).map_err(|_| EventError::InvalidSignature)?;
        if !keys::verify(&signature, &expected, &public_key) {
            return Err(EventError::InvalidSignature);
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn from_json(json: &str) -> Result<Self, EventError> {
        serde_json::from_str(json).map_err(|error| EventError::DecodingFailed(error.to_string()))
    }

    pub fn to_json(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(|error| EventError::EncodingFailed(error.to_string()))
    }

    /// Public keys named by `p` tags, in tag order.
    pub fn referenced_pubkeys(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().filter_map(|tag| match tag {
            Tag::PubkeyRef { pubkey, .. } => Some(pubkey.as_str()),
            Tag::Generic { name, values } if name == crate::tag::PUBLIC_KEY => {
                values.first().map(String::as_str)
            }
            _ => None,
        })
    }

    /// Event ids named by `e` tags, in tag order.
    pub fn referenced_events(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().filter_map(|tag| match tag {
            Tag::EventRef { event_id, .. } => Some(event_id.as_str()),
            Tag::Generic { name, values } if name == crate::tag::EVENT => {
                values.first().map(String::as_str)
            }
            _ => None,
        })
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// The exact bytes an event id is the SHA-256 of:
/// `[0,<pubkey>,<created_at>,<kind>,<tags>,<content>]` as compact JSON.
///
/// `/` is never escaped and non-ASCII text is written as raw UTF-8.
pub fn canonical_bytes(
    public_key: &str,
    created_at: i64,
    kind: Kind,
    tags: &[Tag],
    content: &str,
) -> Result<Vec<u8>, EventError> {
    serde_json::to_vec(&(0, public_key, created_at, kind, tags, content))
        .map_err(|error| EventError::EncodingFailed(error.to_string()))
}

pub fn compute_id(
    public_key: &str,
    created_at: i64,
    kind: Kind,
    tags: &[Tag],
    content: &str,
) -> Result<[u8; 32], EventError> {
    let bytes = canonical_bytes(public_key, created_at, kind, tags, content)?;
    Ok(Sha256::digest(&bytes).into())
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
      "id": "dc90c95f09947507c1044e8f48bcf6350aa6bff1507dd4acfc755b9239b5c962",
      "pubkey": "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d",
      "created_at": 1644271588,
      "kind": 1,
      "tags": [
        ["e", "yetAnotherEventID", "recommendedRelayURL"],
        ["p", "yetAnotherPubKey", "anotherRecommendedRelayURL"],
        ["nonce", "3", "20"],
        ["delegation", "pubKey", "conditionsQuery", "signature"]
      ],
      "content": "Test Content",
      "sig": "230e9d8f0ddaf7eb70b5f7741ccfa37e87a455c9a469282e3464e2052d3192cd63a167e196e381ef9d7e69e9ea43af2443b839974dc85d8aaab9efe1d9296524"
    }"#;

    fn keys() -> Result<KeyPair, KeysError> {
        KeyPair::from_hex("7f7ff03d123792d6ac594bfa67bf6d0c0ab55b6b1fdb6249303fe861f1ccba9a")
    }

    #[test]
    fn decodes_fixture_event() -> Result<(), EventError> {
        let event = Event::from_json(FIXTURE)?;

        assert_eq!(
            event.id,
            "dc90c95f09947507c1044e8f48bcf6350aa6bff1507dd4acfc755b9239b5c962"
        );
        assert_eq!(
            event.public_key,
            "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d"
        );
        assert_eq!(event.created_at, 1_644_271_588);
        assert_eq!(event.kind, Kind::TEXT_NOTE);
        assert_eq!(event.content, "Test Content");
        assert!(event.signature.starts_with("230e9d8f"));

        assert_eq!(
            event.tags,
            vec![
                Tag::EventRef {
                    event_id: "yetAnotherEventID".to_string(),
                    relay_url: Some("recommendedRelayURL".to_string()),
                },
                Tag::PubkeyRef {
                    pubkey: "yetAnotherPubKey".to_string(),
                    relay_url: Some("anotherRecommendedRelayURL".to_string()),
                },
                Tag::Nonce {
                    leading_zero_count: "3".to_string(),
                    target_difficulty: "20".to_string(),
                },
                Tag::Delegation {
                    delegator_pubkey: "pubKey".to_string(),
                    conditions_query: "conditionsQuery".to_string(),
                    signature: "signature".to_string(),
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn missing_field_fails_to_decode() {
        let json = r#"{"id":"id","pubkey":"pub","created_at":1,"kind":1,"tags":[],"sig":""}"#;
        assert!(matches!(
            Event::from_json(json),
            Err(EventError::DecodingFailed(_))
        ));
    }

    #[test]
    fn canonical_bytes_layout() -> Result<(), EventError> {
        let bytes = canonical_bytes(
            "abc",
            1_644_271_588,
            Kind::TEXT_NOTE,
            &[Tag::event("id")],
            "see https://example.com/path \"quoted\"\n",
        )?;
        assert_eq!(
            String::from_utf8_lossy(&bytes),
            r#"[0,"abc",1644271588,1,[["e","id"]],"see https://example.com/path \"quoted\"\n"]"#
        );
        Ok(())
    }

    #[test]
    fn created_event_validates() -> Result<(), Box<dyn std::error::Error>> {
        let keys = keys()?;
        let event = Event::create(
            &keys,
            Kind::TEXT_NOTE,
            vec![Tag::pubkey(keys.public_key_hex())],
            "hello/world ✓",
        )?;

        assert_eq!(event.public_key, keys.public_key_hex());
        assert_eq!(event.id.len(), 64);
        assert_eq!(event.signature.len(), 128);
        event.validate()?;

        let reparsed = Event::from_json(&event.to_json()?)?;
        reparsed.validate()?;
        assert_eq!(reparsed, event);
        Ok(())
    }

    #[test]
    fn tampered_content_is_rejected_by_id() -> Result<(), Box<dyn std::error::Error>> {
        let keys = keys()?;
        let mut event = Event::create(&keys, Kind::TEXT_NOTE, Vec::new(), "original")?;
        event.content = "changed".to_string();
        assert!(matches!(event.validate(), Err(EventError::InvalidEventId)));
        Ok(())
    }

    #[test]
    fn non_canonical_id_spelling_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let keys = keys()?;
        let event = Event::create(&keys, Kind::TEXT_NOTE, Vec::new(), "spelled")?;

        for id in [event.id.to_uppercase(), format!("0x{}", event.id)] {
            let mut respelled = event.clone();
            respelled.id = id;
            assert!(matches!(
                respelled.validate(),
                Err(EventError::InvalidEventId)
            ));
        }
        event.validate()?;
        Ok(())
    }

    #[test]
    fn tampered_signature_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let keys = keys()?;
        let mut event = Event::create(&keys, Kind::TEXT_NOTE, Vec::new(), "original")?;
        let other = Event::create(&keys, Kind::TEXT_NOTE, Vec::new(), "other")?;
        event.signature = other.signature;
        assert!(matches!(
            event.validate(),
            Err(EventError::InvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn equality_is_by_id() -> Result<(), Box<dyn std::error::Error>> {
        let keys = keys()?;
        let event = Event::create(&keys, Kind::TEXT_NOTE, Vec::new(), "x")?;
        let mut copy = event.clone();
        copy.content = "different".to_string();
        assert_eq!(event, copy);

        let mut set = std::collections::HashSet::new();
        set.insert(event);
        set.insert(copy);
        assert_eq!(set.len(), 1);
        Ok(())
    }

    #[test]
    fn referenced_pubkeys_include_extended_p_tags() -> Result<(), EventError> {
        let json = r#"{"id":"","pubkey":"","created_at":1,"kind":3,"tags":[["p","a"],["e","x"],["p","b","wss://r","alias"]],"content":"","sig":""}"#;
        let event = Event::from_json(json)?;
        assert_eq!(event.referenced_pubkeys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(event.referenced_events().collect::<Vec<_>>(), ["x"]);
        Ok(())
    }
}
