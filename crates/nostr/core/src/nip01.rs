//! NIP-01: Basic protocol flow description.
//!
//! This module implements the read side of the core Nostr event structure:
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Structural validation of events received from relays
//! - Tag lookup helpers used by article consumers (`d`, `title`, `summary`)
//! - Kind classification (regular, replaceable, ephemeral, addressable)

use serde::{Deserialize, Serialize};

/// A signed Nostr event as delivered by a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    #[serde(default)]
    pub content: String,
    /// 64-bytes lowercase hex signature
    #[serde(default)]
    pub sig: String,
}

impl Event {
    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// All values of tags named `name`, in tag order.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    /// The `d` tag, which wiki articles use as their title/identifier.
    pub fn identifier(&self) -> Option<&str> {
        self.tag_value("d")
    }

    /// Display title: the `title` tag if present, otherwise the `d` tag.
    pub fn title(&self) -> Option<&str> {
        self.tag_value("title").or_else(|| self.identifier())
    }

    /// The `summary` tag.
    pub fn summary(&self) -> Option<&str> {
        self.tag_value("summary")
    }

    /// Category labels from `t` tags.
    pub fn topics(&self) -> Vec<&str> {
        self.tag_values("t").collect()
    }
}

/// Event kind classification according to NIP-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    /// Events expected to be stored by relays
    Regular,
    /// Only latest event per pubkey+kind is stored
    Replaceable,
    /// Not expected to be stored by relays
    Ephemeral,
    /// Only latest event per pubkey+kind+d-tag is stored
    Addressable,
    /// Unknown classification
    Unknown,
}

// Standard event kinds
pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;
pub const KIND_CONTACTS: u16 = 3;
/// NIP-54 wiki article.
pub const KIND_WIKI_ARTICLE: u16 = 30818;

/// Returns true if `s` is exactly 64 lowercase hexadecimal characters.
pub fn is_hex_key(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Validate a received event's structure (signature is not verified).
pub fn validate_event(event: &Event) -> bool {
    if !is_hex_key(&event.id) || !is_hex_key(&event.pubkey) {
        return false;
    }

    // Relays may omit or mangle sig; accept empty, otherwise require 128 hex chars
    if !event.sig.is_empty()
        && (event.sig.len() != 128 || !event.sig.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return false;
    }

    true
}

/// Classify an event kind.
pub fn classify_kind(kind: u16) -> KindClassification {
    match kind {
        1000..=9999 | 4..=44 | 1 | 2 => KindClassification::Regular,
        10000..=19999 | 0 | 3 => KindClassification::Replaceable,
        20000..=29999 => KindClassification::Ephemeral,
        30000..=39999 => KindClassification::Addressable,
        _ => KindClassification::Unknown,
    }
}

/// Check if a kind is addressable (parameterized replaceable).
pub fn is_addressable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Addressable)
}

/// Sort events newest first, ties broken by id.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}
