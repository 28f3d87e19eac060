//! Subscription filters (NIP-01, NIP-12 generic tag queries).

use serde::{Deserialize, Serialize};

use crate::kind::Kind;

/// Criteria a relay matches events against. Every field is optional and
/// absent fields are left out of the encoded object entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Event ids or id prefixes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// Author pubkeys or pubkey prefixes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<Kind>>,

    #[serde(rename = "#e", default, skip_serializing_if = "Option::is_none")]
    pub event_refs: Option<Vec<String>>,

    #[serde(rename = "#p", default, skip_serializing_if = "Option::is_none")]
    pub pubkey_refs: Option<Vec<String>>,

    #[serde(rename = "#t", default, skip_serializing_if = "Option::is_none")]
    pub hashtags: Option<Vec<String>>,

    #[serde(rename = "#g", default, skip_serializing_if = "Option::is_none")]
    pub geohashes: Option<Vec<String>>,

    #[serde(rename = "#r", default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    #[must_use]
    pub fn kind(self, kind: Kind) -> Self {
        self.kinds([kind])
    }

    #[must_use]
    pub fn event_refs<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_refs = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn pubkey_refs<I, S>(mut self, pubkeys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pubkey_refs = Some(pubkeys.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn hashtags<I, S>(mut self, hashtags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hashtags = Some(hashtags.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn geohashes<I, S>(mut self, geohashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.geohashes = Some(geohashes.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn references<I, S>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references = Some(references.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn since(mut self, timestamp: i64) -> Self {
        self.since = Some(timestamp);
        self
    }

    #[must_use]
    pub fn until(mut self, timestamp: i64) -> Self {
        self.until = Some(timestamp);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}
