//! Hex text <-> byte buffers.
//!
//! Encoding is plain lowercase hex. Decoding is lenient in two
//! ways: a leading `0x` is stripped, and a trailing unpaired digit becomes a
//! byte of its own holding just that nibble (`"abc"` decodes to `[0xab, 0x0c]`).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("malformed hex: invalid character {character:?} at offset {offset}")]
    MalformedHex { character: char, offset: usize },
}

/// Lowercase hex, two digits per byte, no separators.
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(bytes)
}

/// Decode hex text, tolerating an `0x` prefix and an odd trailing nibble.
pub fn decode(text: &str) -> Result<Vec<u8>, HexError> {
    let digits = text.strip_prefix("0x").unwrap_or(text).as_bytes();
    let mut out = Vec::with_capacity(digits.len().div_ceil(2));

    for (pair_index, pair) in digits.chunks(2).enumerate() {
        let offset = pair_index * 2;
        let high = nibble(pair[0], offset)?;
        match pair.get(1) {
            Some(&low) => out.push((high << 4) | nibble(low, offset + 1)?),
            None => out.push(high),
        }
    }

    Ok(out)
}

/// Decode into a fixed-size array; the decoded length must match exactly.
pub fn decode_array<const N: usize>(text: &str) -> Result<Option<[u8; N]>, HexError> {
    let bytes = decode(text)?;
    Ok(<[u8; N]>::try_from(bytes.as_slice()).ok())
}

fn nibble(byte: u8, offset: usize) -> Result<u8, HexError> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        _ => Err(HexError::MalformedHex {
            character: char::from(byte),
            offset,
        }),
    }
}
