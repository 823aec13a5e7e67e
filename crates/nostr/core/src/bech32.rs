//! Bech32 checksummed base-32 codec (BIP-173).
//!
//! NIP-19 identifiers (`note1...`, `nevent1...`) are bech32 strings: a
//! human-readable part, the separator `1`, the payload as 5-bit words, and a
//! six-word checksum. This module wraps the `bech32` crate, keeps the payload
//! as words, and reports failures as [`Bech32Error`]. It knows nothing about
//! the payload layout, which lives in [`crate::nip19`].

use ::bech32::primitives::decode::{
    CharError, CheckedHrpstring, CheckedHrpstringError, ChecksumError, UncheckedHrpstringError,
};
use ::bech32::primitives::hrp;
use ::bech32::{Bech32, ByteIterExt, Checksum, EncodeError, Fe32, Fe32IterExt, Hrp};
use thiserror::Error;

/// Maximum total length of a bech32 string.
pub const MAX_LENGTH: usize = 90;

/// Ceiling for any caller-supplied length limit.
pub const MAX_CODE_LENGTH: usize = 5000;

/// Number of checksum words trailing the data part.
pub const CHECKSUM_LENGTH: usize = 6;

/// Separator between the human-readable part and the data part.
pub const SEPARATOR: char = '1';

/// The BIP-173 checksum with its code length raised to [`MAX_CODE_LENGTH`].
///
/// Plain [`Bech32`] stops at 1023 characters, which event pointers with many
/// relay hints can pass. Limits are enforced per call instead.
pub enum LongBech32 {}

impl Checksum for LongBech32 {
    type MidstateRepr = u32;
    const CODE_LENGTH: usize = MAX_CODE_LENGTH;
    const CHECKSUM_LENGTH: usize = <Bech32 as Checksum>::CHECKSUM_LENGTH;
    const GENERATOR_SH: [u32; 5] = <Bech32 as Checksum>::GENERATOR_SH;
    const TARGET_RESIDUE: u32 = <Bech32 as Checksum>::TARGET_RESIDUE;
}

/// Errors from bech32 decoding and encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Bech32Error {
    #[error("invalid length {actual} (limit {limit})")]
    InvalidLength { actual: usize, limit: usize },

    #[error("invalid character {character:?} at position {position}")]
    InvalidCharacter { character: char, position: usize },

    #[error("mixed-case string")]
    MixedCase,

    #[error("missing or misplaced separator")]
    MissingSeparator,

    #[error("invalid checksum")]
    InvalidChecksum,

    #[error("invalid human-readable part: {0:?}")]
    InvalidHrp(String),

    #[error("data word {0} out of 5-bit range")]
    InvalidWord(u8),

    #[error("bech32 encoding failed: {0}")]
    Encode(String),
}

/// A successfully decoded bech32 string with the checksum stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Lowercased human-readable part.
    pub hrp: String,
    /// Payload as 5-bit words.
    pub words: Vec<u8>,
}

impl Decoded {
    /// Payload regrouped into bytes, see [`words_to_bytes`].
    pub fn to_bytes(&self) -> Vec<u8> {
        words_to_bytes(&self.words)
    }
}

/// Decode a bech32 string of at most [`MAX_LENGTH`] characters.
pub fn decode(input: &str) -> Result<Decoded, Bech32Error> {
    decode_with_limit(input, MAX_LENGTH)
}

/// Decode a bech32 string of at most `limit` characters.
///
/// `limit` is capped at [`MAX_CODE_LENGTH`].
pub fn decode_with_limit(input: &str, limit: usize) -> Result<Decoded, Bech32Error> {
    let limit = limit.min(MAX_CODE_LENGTH);
    let len = input.chars().count();
    if len == 0 || len > limit {
        return Err(Bech32Error::InvalidLength { actual: len, limit });
    }

    let checked =
        CheckedHrpstring::new::<LongBech32>(input).map_err(|e| decode_error(input, e))?;

    // Every data character was validated by the parser
    let words = checked
        .data_part_ascii_no_checksum()
        .iter()
        .filter_map(|&b| Fe32::from_char(char::from(b)).ok())
        .map(Fe32::to_u8)
        .collect();

    Ok(Decoded {
        hrp: checked.hrp().to_lowercase(),
        words,
    })
}

fn decode_error(input: &str, err: CheckedHrpstringError) -> Bech32Error {
    match err {
        CheckedHrpstringError::Parse(UncheckedHrpstringError::Char(err)) => match err {
            CharError::MixedCase => Bech32Error::MixedCase,
            // The parser scans the data part from the end
            CharError::InvalidChar(character) => Bech32Error::InvalidCharacter {
                character,
                position: last_position(input, character),
            },
            _ => Bech32Error::MissingSeparator,
        },
        CheckedHrpstringError::Parse(UncheckedHrpstringError::Hrp(err)) => match err {
            hrp::Error::Empty => Bech32Error::MissingSeparator,
            hrp::Error::MixedCase => Bech32Error::MixedCase,
            hrp::Error::NonAsciiChar(character) => Bech32Error::InvalidCharacter {
                character,
                position: first_position(input, character),
            },
            hrp::Error::InvalidAsciiByte(byte) => {
                let character = char::from(byte);
                Bech32Error::InvalidCharacter {
                    character,
                    position: first_position(input, character),
                }
            }
            other => Bech32Error::InvalidHrp(other.to_string()),
        },
        CheckedHrpstringError::Parse(_) => Bech32Error::MissingSeparator,
        CheckedHrpstringError::Checksum(err) => match err {
            ChecksumError::CodeLength(err) => Bech32Error::InvalidLength {
                actual: err.encoded_length,
                limit: err.code_length,
            },
            // Fewer than six characters after the separator
            ChecksumError::InvalidLength => Bech32Error::MissingSeparator,
            _ => Bech32Error::InvalidChecksum,
        },
        _ => Bech32Error::InvalidChecksum,
    }
}

fn first_position(input: &str, character: char) -> usize {
    input.chars().position(|c| c == character).unwrap_or(0)
}

fn last_position(input: &str, character: char) -> usize {
    let len = input.chars().count();
    input
        .chars()
        .rev()
        .position(|c| c == character)
        .map_or(0, |from_end| len - 1 - from_end)
}

fn parse_hrp(hrp: &str) -> Result<Hrp, Bech32Error> {
    Hrp::parse(&hrp.to_ascii_lowercase()).map_err(|_| Bech32Error::InvalidHrp(hrp.to_string()))
}

fn check_length(actual: usize, limit: usize) -> Result<(), Bech32Error> {
    if actual > limit {
        return Err(Bech32Error::InvalidLength { actual, limit });
    }
    Ok(())
}

/// Encode 5-bit words under `hrp`, limited to [`MAX_LENGTH`] characters.
pub fn encode(hrp: &str, words: &[u8]) -> Result<String, Bech32Error> {
    encode_with_limit(hrp, words, MAX_LENGTH)
}

/// Encode 5-bit words under `hrp`, limited to `limit` characters.
pub fn encode_with_limit(hrp: &str, words: &[u8], limit: usize) -> Result<String, Bech32Error> {
    let hrp = parse_hrp(hrp)?;
    let fes = words
        .iter()
        .map(|&word| Fe32::try_from(word).map_err(|_| Bech32Error::InvalidWord(word)))
        .collect::<Result<Vec<_>, _>>()?;

    check_length(
        hrp.len() + 1 + fes.len() + CHECKSUM_LENGTH,
        limit.min(MAX_CODE_LENGTH),
    )?;

    Ok(fes
        .into_iter()
        .with_checksum::<LongBech32>(&hrp)
        .chars()
        .collect())
}

/// Encode bytes under `hrp`, limited to `limit` characters.
pub fn encode_bytes_with_limit(hrp: &str, data: &[u8], limit: usize) -> Result<String, Bech32Error> {
    let hrp = parse_hrp(hrp)?;
    let limit = limit.min(MAX_CODE_LENGTH);
    let length = ::bech32::encoded_length::<LongBech32>(hrp, data).map_err(|e| {
        Bech32Error::InvalidLength {
            actual: e.encoded_length,
            limit,
        }
    })?;
    check_length(length, limit)?;

    ::bech32::encode::<LongBech32>(hrp, data).map_err(|e| match e {
        EncodeError::TooLong(e) => Bech32Error::InvalidLength {
            actual: e.encoded_length,
            limit,
        },
        other => Bech32Error::Encode(other.to_string()),
    })
}

/// Regroup bytes into 5-bit words, most significant bit first, zero-padding
/// the final word.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().copied().bytes_to_fes().map(Fe32::to_u8).collect()
}

/// Regroup 5-bit words into bytes, most significant bit first.
///
/// Bits that do not fill a whole trailing byte are dropped. Only the low five
/// bits of each word are used.
pub fn words_to_bytes(words: &[u8]) -> Vec<u8> {
    words
        .iter()
        .filter_map(|&word| Fe32::try_from(word & 0x1f).ok())
        .fes_to_bytes()
        .collect()
}
