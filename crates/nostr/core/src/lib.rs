pub mod bech32;
mod event;
pub mod filter;
pub mod hex;
mod keys;
mod kind;
pub mod message;
mod metadata;
pub mod nip05;
pub mod nip19;
mod subscription;
pub mod tag;

pub use bech32::Bech32Error;
pub use event::{Event, EventError, UnsignedEvent, canonical_bytes, compute_id};
pub use filter::Filter;
pub use hex::HexError;
pub use keys::{KeyPair, KeysError, verify};
pub use kind::{Kind, KindClassification};
pub use message::{ClientMessage, MessageError, RelayMessage};
pub use metadata::Metadata;
pub use nip05::{DnsIdentifiedUser, DnsIdentifier, Nip05Error};
pub use subscription::Subscription;
pub use tag::{Tag, TagError};
