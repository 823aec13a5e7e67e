//! Nostr protocol value types for the wiki client.
//!
//! This crate provides:
//! - NIP-01: The `Event` type and tag helpers for received events
//! - BIP-173: A checksummed base-32 codec (`bech32`)
//! - NIP-19: Decoding of user-facing event identifiers (`note1...`, `nevent1...`)
//!
//! Nothing in this crate performs I/O; the relay pool and subscription
//! routing live in `nostr-client`.

pub mod bech32;
pub mod nip01;
pub mod nip19;

// NIP-01: Basic protocol
pub use nip01::{
    Event, KIND_CONTACTS, KIND_METADATA, KIND_SHORT_TEXT_NOTE, KIND_WIKI_ARTICLE,
    KindClassification, classify_kind, is_addressable_kind, is_hex_key, sort_events,
    validate_event,
};

// Bech32 codec
pub use self::bech32::{Bech32Error, Decoded};

// NIP-19: Identifiers
pub use nip19::{
    DecodedIdentifier, IdentifierError, IdentifierProfile, NEVENT_HRP, NOTE_HRP,
    decode_identifier, encode_nevent, encode_note, parse_identifier, try_parse_identifier,
};
