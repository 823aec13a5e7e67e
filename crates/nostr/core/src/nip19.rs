//! NIP-19: bech32-encoded event identifiers.
//!
//! Turns what a user pastes into a search box or URL into the 32-byte event
//! id used in `ids` filters. Three forms are accepted:
//!
//! - 64 lowercase hex characters, returned unchanged
//! - `note1...`: the payload is the raw 32-byte id
//! - `nevent1...`: a TLV payload whose first record is assumed to be the id
//!
//! The `nevent` path does not walk the TLV records. It reads the bytes right
//! after the first 2-byte type/length header, so a pointer whose first record
//! is not the event id decodes to the wrong key without any error.

use crate::bech32::{self, Bech32Error};
use crate::nip01::is_hex_key;
use thiserror::Error;

/// Human-readable part of a bare event id.
pub const NOTE_HRP: &str = "note";
/// Human-readable part of an event pointer.
pub const NEVENT_HRP: &str = "nevent";
/// Size of an event id in bytes.
pub const KEY_SIZE: usize = 32;
/// Length limit for event pointers, which carry relay hints and routinely
/// exceed the 90-character bech32 limit.
pub const EVENT_POINTER_MAX_LENGTH: usize = 5000;

const EVENT_POINTER_KEY_OFFSET: usize = 2;
const TLV_SPECIAL: u8 = 0;
const TLV_RELAY: u8 = 1;

/// Where a decoded key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierProfile {
    /// Raw 64-character hex
    Hex,
    /// `note1...`
    Note,
    /// `nevent1...`
    EventPointer,
}

impl IdentifierProfile {
    fn from_input(input: &str) -> Option<Self> {
        if input.starts_with("note1") {
            Some(Self::Note)
        } else if input.starts_with("nevent1") {
            Some(Self::EventPointer)
        } else {
            None
        }
    }

    fn hrp(self) -> &'static str {
        match self {
            Self::Hex => "",
            Self::Note => NOTE_HRP,
            Self::EventPointer => NEVENT_HRP,
        }
    }
}

/// Errors from identifier parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("empty identifier")]
    Empty,

    #[error("bech32 decoding error: {0}")]
    Decode(#[from] Bech32Error),

    #[error("unsupported identifier profile: {0}")]
    UnsupportedProfile(String),

    #[error("truncated {profile:?} payload: need {expected} bytes, got {actual}")]
    TruncatedPayload {
        profile: IdentifierProfile,
        expected: usize,
        actual: usize,
    },
}

/// A canonical event key together with the encoding it was decoded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodedIdentifier {
    key: [u8; KEY_SIZE],
    profile: IdentifierProfile,
}

impl DecodedIdentifier {
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn profile(&self) -> IdentifierProfile {
        self.profile
    }

    /// The key as 64 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.key)
    }
}

/// Parse a user-supplied identifier into a lowercase hex event key.
///
/// Returns `None` for anything that is not a recognized, well-formed
/// identifier. Callers own the user-facing "invalid identifier" message.
pub fn parse_identifier(raw: &str) -> Option<String> {
    decode_identifier(raw).map(|id| id.to_hex())
}

/// Like [`parse_identifier`] but keeps the profile.
pub fn decode_identifier(raw: &str) -> Option<DecodedIdentifier> {
    try_parse_identifier(raw).ok()
}

/// Parse an identifier, reporting why it was rejected.
pub fn try_parse_identifier(raw: &str) -> Result<DecodedIdentifier, IdentifierError> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(IdentifierError::Empty);
    }

    if is_hex_key(input) {
        let mut key = [0u8; KEY_SIZE];
        hex::decode_to_slice(input, &mut key)
            .map_err(|_| IdentifierError::UnsupportedProfile(input.to_string()))?;
        return Ok(DecodedIdentifier {
            key,
            profile: IdentifierProfile::Hex,
        });
    }

    let profile = IdentifierProfile::from_input(input)
        .ok_or_else(|| IdentifierError::UnsupportedProfile(prefix_of(input)))?;

    let decoded = match profile {
        IdentifierProfile::EventPointer => {
            bech32::decode_with_limit(input, EVENT_POINTER_MAX_LENGTH)?
        }
        _ => bech32::decode(input)?,
    };
    if decoded.hrp != profile.hrp() {
        return Err(IdentifierError::UnsupportedProfile(decoded.hrp));
    }

    let bytes = decoded.to_bytes();
    let offset = match profile {
        IdentifierProfile::EventPointer => EVENT_POINTER_KEY_OFFSET,
        _ => 0,
    };
    let key_bytes = bytes
        .get(offset..offset + KEY_SIZE)
        .ok_or(IdentifierError::TruncatedPayload {
            profile,
            expected: offset + KEY_SIZE,
            actual: bytes.len(),
        })?;

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(key_bytes);
    Ok(DecodedIdentifier { key, profile })
}

fn prefix_of(input: &str) -> String {
    match input.rfind(bech32::SEPARATOR) {
        Some(pos) if pos > 0 => input[..pos].to_string(),
        _ => input.chars().take(8).collect(),
    }
}

/// Encode an event id as `note1...`.
pub fn encode_note(id: &[u8; KEY_SIZE]) -> Result<String, Bech32Error> {
    bech32::encode_bytes_with_limit(NOTE_HRP, id, bech32::MAX_LENGTH)
}

/// Encode an event pointer as `nevent1...` with the id record first,
/// followed by one relay record per hint.
pub fn encode_nevent(id: &[u8; KEY_SIZE], relays: &[&str]) -> Result<String, Bech32Error> {
    let mut tlv = Vec::with_capacity(2 + KEY_SIZE);
    push_tlv(&mut tlv, TLV_SPECIAL, id);
    for relay in relays {
        push_tlv(&mut tlv, TLV_RELAY, relay.as_bytes());
    }
    bech32::encode_bytes_with_limit(NEVENT_HRP, &tlv, EVENT_POINTER_MAX_LENGTH)
}

fn push_tlv(out: &mut Vec<u8>, kind: u8, value: &[u8]) {
    // TLV lengths are a single byte; longer values are cut
    let len = value.len().min(u8::MAX as usize);
    out.push(kind);
    out.push(len as u8);
    out.extend_from_slice(&value[..len]);
}
