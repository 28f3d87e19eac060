//! Bech32 (BIP-173) binary-to-text codec.
//!
//! Used for human-shareable identifiers such as `npub...` and `nsec...`.
//! The checksum is the 6-symbol BCH code over the expanded prefix and data.
//! Decoding is strict: no mixed case, printable ASCII only, at most 90
//! characters, and zero padding bits.

use thiserror::Error;

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const GENERATORS: [u32; 5] = [0x3b6a_57b2, 0x2650_8e6d, 0x1ea1_19fa, 0x3d42_33dd, 0x2a14_62b3];
const SEPARATOR: char = '1';
const CHECKSUM_LEN: usize = 6;
const MAX_LEN: usize = 90;

/// Errors produced while encoding or decoding Bech32 strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Bech32Error {
    #[error("invalid bech32 character")]
    InvalidCharacter,

    #[error("bech32 string mixes upper and lower case")]
    CaseMixing,

    #[error("bech32 separator missing or misplaced")]
    MissingSeparator,

    #[error("bech32 checksum mismatch")]
    InvalidChecksum,

    #[error("bech32 data has invalid padding")]
    ChecksumOrPaddingError,

    #[error("invalid human-readable prefix: {0:?}")]
    InvalidPrefix(String),

    #[error("expected prefix {expected:?}, found {found:?}")]
    UnexpectedPrefix { expected: String, found: String },

    #[error("expected {expected} payload bytes, found {found}")]
    InvalidLength { expected: usize, found: usize },
}

/// Encode `payload` under the human-readable `prefix`.
///
/// The prefix must be non-empty printable ASCII without upper-case letters so
/// that the output is always decodable.
pub fn encode(prefix: &str, payload: &[u8]) -> Result<String, Bech32Error> {
    if prefix.is_empty()
        || prefix
            .bytes()
            .any(|byte| !(33..=126).contains(&byte) || byte.is_ascii_uppercase())
    {
        return Err(Bech32Error::InvalidPrefix(prefix.to_string()));
    }

    let data = regroup(payload, 8, 5, true).ok_or(Bech32Error::ChecksumOrPaddingError)?;
    let checksum = create_checksum(prefix, &data);

    let mut out = String::with_capacity(prefix.len() + 1 + data.len() + CHECKSUM_LEN);
    out.push_str(prefix);
    out.push(SEPARATOR);
    out.extend(
        data.iter()
            .chain(checksum.iter())
            .map(|&symbol| char::from(CHARSET[usize::from(symbol)])),
    );
    Ok(out)
}

/// Decode a Bech32 string into its (lower-cased) prefix and payload bytes.
pub fn decode(text: &str) -> Result<(String, Vec<u8>), Bech32Error> {
    let bytes = text.as_bytes();
    if bytes.iter().any(|byte| !(33..=126).contains(byte)) {
        return Err(Bech32Error::InvalidCharacter);
    }

    let has_lower = bytes.iter().any(u8::is_ascii_lowercase);
    let has_upper = bytes.iter().any(u8::is_ascii_uppercase);
    if has_lower && has_upper {
        return Err(Bech32Error::CaseMixing);
    }

    let text = text.to_ascii_lowercase();
    let separator = text.rfind(SEPARATOR).ok_or(Bech32Error::MissingSeparator)?;
    if separator < 1 || text.len() > MAX_LEN || text.len() - separator - 1 < CHECKSUM_LEN {
        return Err(Bech32Error::MissingSeparator);
    }

    let (prefix, rest) = text.split_at(separator);
    let data = rest[1..]
        .bytes()
        .map(|byte| {
            CHARSET
                .iter()
                .position(|&symbol| symbol == byte)
                .map(|index| index as u8)
                .ok_or(Bech32Error::InvalidCharacter)
        })
        .collect::<Result<Vec<u8>, _>>()?;

    if !verify_checksum(prefix, &data) {
        return Err(Bech32Error::InvalidChecksum);
    }

    let payload = regroup(&data[..data.len() - CHECKSUM_LEN], 5, 8, false)
        .ok_or(Bech32Error::ChecksumOrPaddingError)?;
    Ok((prefix.to_string(), payload))
}

/// `true` when the data symbols (checksum included) match the prefix.
pub fn verify_checksum(prefix: &str, data: &[u8]) -> bool {
    let mut values = expand_prefix(prefix);
    values.extend_from_slice(data);
    polymod(&values) == 1
}

fn create_checksum(prefix: &str, data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut values = expand_prefix(prefix);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0; CHECKSUM_LEN]);
    let modulus = polymod(&values) ^ 1;

    let mut checksum = [0u8; CHECKSUM_LEN];
    for (index, symbol) in checksum.iter_mut().enumerate() {
        *symbol = ((modulus >> (5 * (5 - index))) & 31) as u8;
    }
    checksum
}

/// High bits of every character, a zero separator, then the low bits.
fn expand_prefix(prefix: &str) -> Vec<u8> {
    let bytes = prefix.as_bytes();
    let mut values = Vec::with_capacity(bytes.len() * 2 + 1);
    values.extend(bytes.iter().map(|byte| byte >> 5));
    values.push(0);
    values.extend(bytes.iter().map(|byte| byte & 31));
    values
}

fn polymod(values: &[u8]) -> u32 {
    let mut checksum: u32 = 1;
    for &value in values {
        let top = checksum >> 25;
        checksum = ((checksum & 0x01ff_ffff) << 5) ^ u32::from(value);
        for (bit, generator) in GENERATORS.iter().enumerate() {
            if (top >> bit) & 1 == 1 {
                checksum ^= generator;
            }
        }
    }
    checksum
}

/// MSB-first regrouping between bit widths. Returns `None` when `pad` is off
/// and the tail is either too long for a full group or carries nonzero bits.
fn regroup(input: &[u8], from: u32, to: u32, pad: bool) -> Option<Vec<u8>> {
    let max_value: u32 = (1 << to) - 1;
    let mut accumulator: u32 = 0;
    let mut bits: u32 = 0;
    let mut out = Vec::with_capacity(input.len() * from as usize / to as usize + 1);

    for &value in input {
        let value = u32::from(value);
        if value >> from != 0 {
            return None;
        }
        accumulator = (accumulator << from) | value;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((accumulator >> bits) & max_value) as u8);
        }
    }

    if pad {
        if bits > 0 {
            out.push(((accumulator << (to - bits)) & max_value) as u8);
        }
    } else if bits >= from || (accumulator << (to - bits)) & max_value != 0 {
        return None;
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex;

    const PUBLIC_KEY_HEX: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";
    const NPUB: &str = "npub180cvv07tjdrrgpa0j7j7tmnyl2yr6yr7l8j4s3evf6u64th6gkwsyjh6w6";
    const NSEC: &str = "nsec180cvv07tjdrrgpa0j7j7tmnyl2yr6yr7l8j4s3evf6u64th6gkwsgyumg0";

    #[test]
    fn encodes_public_key_vector() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = hex::decode(PUBLIC_KEY_HEX)?;
        assert_eq!(encode("npub", &bytes)?, NPUB);
        assert_eq!(encode("nsec", &bytes)?, NSEC);
        Ok(())
    }

    #[test]
    fn decodes_public_key_vector() -> Result<(), Box<dyn std::error::Error>> {
        let (prefix, payload) = decode(NPUB)?;
        assert_eq!(prefix, "npub");
        assert_eq!(hex::encode(payload), PUBLIC_KEY_HEX);
        Ok(())
    }

    #[test]
    fn decodes_upper_case_input() -> Result<(), Bech32Error> {
        let (prefix, payload) = decode(&NPUB.to_ascii_uppercase())?;
        assert_eq!(prefix, "npub");
        assert_eq!(payload.len(), 32);
        Ok(())
    }

    #[test]
    fn roundtrip_various_lengths() -> Result<(), Bech32Error> {
        for len in [0usize, 1, 2, 5, 19, 32, 40] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 37 + 11) as u8).collect();
            let encoded = encode("note", &payload)?;
            let (prefix, decoded) = decode(&encoded)?;
            assert_eq!(prefix, "note");
            assert_eq!(decoded, payload, "length {len}");
        }
        Ok(())
    }

    #[test]
    fn single_character_substitution_is_detected() -> Result<(), Bech32Error> {
        let data_start = NPUB.rfind('1').map_or(0, |index| index + 1);
        for position in data_start..NPUB.len() {
            let original = NPUB.as_bytes()[position];
            for &replacement in CHARSET.iter().filter(|&&c| c != original).take(4) {
                let mut corrupted = NPUB.as_bytes().to_vec();
                corrupted[position] = replacement;
                let corrupted = String::from_utf8(corrupted).map_err(|_| Bech32Error::InvalidCharacter)?;
                assert_eq!(
                    decode(&corrupted),
                    Err(Bech32Error::InvalidChecksum),
                    "substitution at {position} not detected"
                );
            }
        }
        Ok(())
    }

    #[test]
    fn rejects_missing_separator() {
        assert_eq!(
            decode("somerandomhumanreadablepart"),
            Err(Bech32Error::MissingSeparator)
        );
    }

    #[test]
    fn rejects_misplaced_separator_and_length() {
        assert_eq!(decode("1qqqqqqqq"), Err(Bech32Error::MissingSeparator));
        assert_eq!(decode("npub1qqqqq"), Err(Bech32Error::MissingSeparator));
        let too_long = format!("a1{}", "q".repeat(89));
        assert_eq!(decode(&too_long), Err(Bech32Error::MissingSeparator));
    }

    #[test]
    fn rejects_mixed_case_before_checksum() {
        assert_eq!(decode("mixedCASED"), Err(Bech32Error::CaseMixing));
        let mut mixed = NPUB.to_string();
        mixed.replace_range(0..1, "N");
        assert_eq!(decode(&mixed), Err(Bech32Error::CaseMixing));
    }

    #[test]
    fn rejects_non_printable_and_non_charset_characters() {
        assert_eq!(decode(" "), Err(Bech32Error::InvalidCharacter));
        assert_eq!(decode("npub1\u{7f}qqqqqq"), Err(Bech32Error::InvalidCharacter));
        assert_eq!(decode("npub1bqqqqqqq"), Err(Bech32Error::InvalidCharacter));
    }

    #[test]
    fn rejects_nonzero_padding() -> Result<(), Bech32Error> {
        // One 5-bit symbol of payload is never a whole byte.
        let data = [31u8];
        let mut symbols = data.to_vec();
        symbols.extend_from_slice(&create_checksum("a", &data));
        let text: String = std::iter::once("a1".to_string())
            .chain(symbols.iter().map(|&s| char::from(CHARSET[usize::from(s)]).to_string()))
            .collect();
        assert_eq!(decode(&text), Err(Bech32Error::ChecksumOrPaddingError));
        Ok(())
    }

    #[test]
    fn encode_rejects_unusable_prefix() {
        assert!(matches!(encode("", &[1]), Err(Bech32Error::InvalidPrefix(_))));
        assert!(matches!(encode("Npub", &[1]), Err(Bech32Error::InvalidPrefix(_))));
        assert!(matches!(encode("n pub", &[1]), Err(Bech32Error::InvalidPrefix(_))));
    }

    #[test]
    fn matches_reference_crate() -> Result<(), Box<dyn std::error::Error>> {
        let hrp = ::bech32::Hrp::parse("nevent")?;
        for len in [1usize, 16, 32, 33] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 91 + 3) as u8).collect();
            let ours = encode("nevent", &payload)?;
            let theirs = ::bech32::encode::<::bech32::Bech32>(hrp, &payload)?;
            assert_eq!(ours, theirs);

            let (_, decoded) = ::bech32::decode(&ours)?;
            assert_eq!(decoded, payload);
        }
        Ok(())
    }
}
