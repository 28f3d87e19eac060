//! Profile metadata carried in the content of a set-metadata event.

use serde::{Deserialize, Serialize};

use crate::event::EventError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// DNS identifier (`handle@domain`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Encode as event content. Slashes in URLs are kept as-is.
    pub fn to_content(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(|error| EventError::EncodingFailed(error.to_string()))
    }

    pub fn from_content(content: &str) -> Result<Self, EventError> {
        serde_json::from_str(content).map_err(|error| EventError::DecodingFailed(error.to_string()))
    }
}
