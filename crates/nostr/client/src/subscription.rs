//! Subscription state and filter presets.
//!
//! A subscription is identified on the wire by its id only. What the
//! subscription is *for* travels alongside it as a [`SubscriptionKind`], so
//! consumers never have to parse meaning back out of the id.

use crate::message::Filter;
use nostr::KIND_WIKI_ARTICLE;
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// Generate a unique subscription ID.
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// What a subscription is for, carried next to its wire id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum SubscriptionKind {
    #[default]
    Default,
    /// Latest articles feed
    RecentArticles,
    /// Free-text search results
    Search,
    /// Single article by event id
    ArticleLookup,
    /// One side of a side-by-side comparison
    ComparePane(u8),
    Custom(String),
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::RecentArticles => f.write_str("recent-articles"),
            Self::Search => f.write_str("search"),
            Self::ArticleLookup => f.write_str("article-lookup"),
            Self::ComparePane(pane) => write!(f, "compare-pane-{}", pane),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// Identity of a subscription as seen by its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub id: String,
    pub kind: SubscriptionKind,
}

impl SubscriptionInfo {
    pub fn new(id: impl Into<String>, kind: SubscriptionKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// REQ sent, nothing back yet
    Created,
    /// At least one event delivered
    Receiving,
    /// End of stored events seen
    Ended,
}

/// What an EOSE changed for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EoseOutcome {
    /// First end-of-stream with zero events so far
    pub signal_empty: bool,
    /// Every relay that got the REQ has now finished
    pub all_eose: bool,
}

/// Tracks which relays have a specific subscription and what they sent.
#[derive(Debug, Clone)]
pub struct SubscriptionTracker {
    /// Subscription ID
    pub id: String,
    /// Filter for this subscription
    pub filter: Filter,
    /// Relays that have this subscription
    pub relays: HashSet<String>,
    /// Whether EOSE has been received from all relays
    pub all_eose: bool,
    /// Relays that have sent EOSE (or CLOSED)
    pub eose_relays: HashSet<String>,
    /// Events delivered, across all relays
    pub events_received: u64,
    per_relay: HashMap<String, u64>,
    state: SubscriptionState,
    empty_signaled: bool,
    seen: HashSet<String>,
}

impl SubscriptionTracker {
    /// Create a new subscription tracker.
    pub fn new(id: impl Into<String>, filter: Filter) -> Self {
        Self {
            id: id.into(),
            filter,
            relays: HashSet::new(),
            all_eose: false,
            eose_relays: HashSet::new(),
            events_received: 0,
            per_relay: HashMap::new(),
            state: SubscriptionState::Created,
            empty_signaled: false,
            seen: HashSet::new(),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Add a relay to this subscription.
    pub fn add_relay(&mut self, relay_url: impl Into<String>) {
        self.relays.insert(relay_url.into());
        self.update_all_eose();
    }

    /// Remove a relay from this subscription. Returns true if that completed
    /// the set of relays still owing an EOSE.
    pub fn remove_relay(&mut self, relay_url: &str) -> bool {
        let was_done = self.all_eose;
        if !self.relays.remove(relay_url) {
            return false;
        }
        self.eose_relays.remove(relay_url);
        // Losing the last relay also ends the wait
        self.all_eose = self.relays.is_subset(&self.eose_relays);
        !was_done && self.all_eose
    }

    /// Count an event from `relay_url`. Returns false when the event should
    /// not be delivered (duplicate id with `dedupe` on).
    pub fn record_event(&mut self, relay_url: &str, event_id: &str, dedupe: bool) -> bool {
        if dedupe && !self.seen.insert(event_id.to_string()) {
            return false;
        }
        self.events_received += 1;
        *self.per_relay.entry(relay_url.to_string()).or_default() += 1;
        if self.state == SubscriptionState::Created {
            self.state = SubscriptionState::Receiving;
        }
        true
    }

    /// Mark EOSE received from a relay.
    pub fn mark_eose(&mut self, relay_url: impl Into<String>) -> EoseOutcome {
        let was_done = self.all_eose;
        self.eose_relays.insert(relay_url.into());
        self.update_all_eose();
        self.state = SubscriptionState::Ended;

        let signal_empty = self.events_received == 0 && !self.empty_signaled;
        if signal_empty {
            self.empty_signaled = true;
        }

        EoseOutcome {
            signal_empty,
            all_eose: !was_done && self.all_eose,
        }
    }

    /// A relay closed the subscription; it will send nothing more.
    pub fn mark_closed(&mut self, relay_url: impl Into<String>) -> bool {
        let was_done = self.all_eose;
        self.eose_relays.insert(relay_url.into());
        self.update_all_eose();
        !was_done && self.all_eose
    }

    /// Update all_eose flag.
    fn update_all_eose(&mut self) {
        self.all_eose = !self.relays.is_empty() && self.relays.is_subset(&self.eose_relays);
    }

    /// Check if a relay has this subscription.
    pub fn has_relay(&self, relay_url: &str) -> bool {
        self.relays.contains(relay_url)
    }

    /// Get the number of relays with this subscription.
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// Events delivered from one relay.
    pub fn events_from(&self, relay_url: &str) -> u64 {
        self.per_relay.get(relay_url).copied().unwrap_or(0)
    }
}

/// Most recent wiki articles.
pub fn recent_articles(limit: u64) -> Filter {
    Filter::new().kinds(vec![KIND_WIKI_ARTICLE]).limit(limit)
}

/// One wiki article by its 64-hex event id.
pub fn article_by_id(event_id: impl Into<String>) -> Filter {
    Filter::new()
        .kinds(vec![KIND_WIKI_ARTICLE])
        .ids(vec![event_id.into()])
}

/// Wiki articles matching a free-text query.
pub fn search_articles(query: impl Into<String>, limit: u64) -> Filter {
    Filter::new()
        .kinds(vec![KIND_WIKI_ARTICLE])
        .search(query)
        .limit(limit)
}

/// Wiki articles tagged with a category.
pub fn articles_in_category(topic: impl Into<String>, limit: u64) -> Filter {
    Filter::new()
        .kinds(vec![KIND_WIKI_ARTICLE])
        .topics(vec![topic.into()])
        .limit(limit)
}
