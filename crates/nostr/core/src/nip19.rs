//! NIP-19: bech32-encoded entities (`npub`, `nsec`, `note`).

use crate::bech32::{self, Bech32Error};
use crate::hex;

pub const PUBLIC_KEY_PREFIX: &str = "npub";
pub const SECRET_KEY_PREFIX: &str = "nsec";
pub const NOTE_PREFIX: &str = "note";

pub fn encode_npub(public_key: &[u8; 32]) -> Result<String, Bech32Error> {
    bech32::encode(PUBLIC_KEY_PREFIX, public_key)
}

pub fn encode_nsec(secret_key: &[u8; 32]) -> Result<String, Bech32Error> {
    bech32::encode(SECRET_KEY_PREFIX, secret_key)
}

pub fn encode_note(event_id: &[u8; 32]) -> Result<String, Bech32Error> {
    bech32::encode(NOTE_PREFIX, event_id)
}

pub fn decode_npub(text: &str) -> Result<[u8; 32], Bech32Error> {
    decode_fixed(PUBLIC_KEY_PREFIX, text)
}

pub fn decode_nsec(text: &str) -> Result<[u8; 32], Bech32Error> {
    decode_fixed(SECRET_KEY_PREFIX, text)
}

pub fn decode_note(text: &str) -> Result<[u8; 32], Bech32Error> {
    decode_fixed(NOTE_PREFIX, text)
}

/// Accept a public key as 64 hex characters or as an `npub` string and
/// return it as lowercase hex.
pub fn decode_public_key(text: &str) -> Result<String, Bech32Error> {
    let trimmed = text.trim();
    if trimmed.len() == 64 && trimmed.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Ok(trimmed.to_ascii_lowercase());
    }
    decode_npub(trimmed).map(hex::encode)
}

fn decode_fixed(expected: &str, text: &str) -> Result<[u8; 32], Bech32Error> {
    let (prefix, payload) = bech32::decode(text)?;
    if prefix != expected {
        return Err(Bech32Error::UnexpectedPrefix {
            expected: expected.to_string(),
            found: prefix,
        });
    }
    let found = payload.len();
    <[u8; 32]>::try_from(payload).map_err(|_| Bech32Error::InvalidLength {
        expected: 32,
        found,
    })
}
