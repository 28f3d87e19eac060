//! Event kinds.
//!
//! Kinds form an open set: any integer round-trips, the constants below only
//! name the ones this crate knows about.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(pub u16);

impl Kind {
    pub const SET_METADATA: Self = Self(0);
    pub const TEXT_NOTE: Self = Self(1);
    pub const RECOMMEND_RELAY: Self = Self(2);
    pub const CONTACT_LIST: Self = Self(3);
    pub const ENCRYPTED_DIRECT_MESSAGE: Self = Self(4);
    pub const EVENT_DELETION: Self = Self(5);
    pub const REACTION: Self = Self(7);
    pub const CHANNEL_CREATION: Self = Self(40);
    pub const CHANNEL_METADATA: Self = Self(41);
    pub const CHANNEL_MESSAGE: Self = Self(42);
    pub const CHANNEL_HIDE_MESSAGE: Self = Self(43);
    pub const CHANNEL_MUTE_USER: Self = Self(44);

    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// Storage class a relay is expected to apply to this kind.
    pub fn classification(self) -> KindClassification {
        let k = u32::from(self.0);

        if (1000..10000).contains(&k) || (4..45).contains(&k) || k == 1 || k == 2 {
            return KindClassification::Regular;
        }
        if (10000..20000).contains(&k) || k == 0 || k == 3 {
            return KindClassification::Replaceable;
        }
        if (20000..30000).contains(&k) {
            return KindClassification::Ephemeral;
        }
        if (30000..40000).contains(&k) {
            return KindClassification::Addressable;
        }
        KindClassification::Unknown
    }
}

impl From<u16> for Kind {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event kind classification according to NIP-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    /// Stored by relays
    Regular,
    /// Only latest event per pubkey+kind is stored
    Replaceable,
    /// Not stored
    Ephemeral,
    /// Only latest event per pubkey+kind+d-tag is stored
    Addressable,
    Unknown,
}
