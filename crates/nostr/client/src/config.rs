//! Pool and router configuration.
//!
//! Both structs deserialize from JSON with every field optional. Durations
//! are expressed in milliseconds (`connect_timeout_ms`, `ready_timeout_ms`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relay pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Bound on a single relay's connect attempt
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
    /// Bound on `connect_all` when no relay has opened yet
    #[serde(rename = "ready_timeout_ms", with = "millis")]
    pub ready_timeout: Duration,
    /// Capacity of the channel carrying inbound frames to the router
    pub frame_buffer: usize,
    /// Capacity of the pool event broadcast channel
    pub event_buffer: usize,
    /// Grace period for a relay task to close its socket after disconnect
    #[serde(rename = "close_grace_ms", with = "millis")]
    pub close_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        // Read timeouts from environment or use defaults
        let connect_timeout =
            env_millis("NOSTR_CONNECT_TIMEOUT_MS").unwrap_or(Duration::from_secs(10));
        let ready_timeout =
            env_millis("NOSTR_READY_TIMEOUT_MS").unwrap_or(Duration::from_secs(5));

        Self {
            connect_timeout,
            ready_timeout,
            frame_buffer: 1024,
            event_buffer: 1000,
            close_grace: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

/// Subscription router configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Drop events whose id was already delivered for the same subscription.
    /// Off by default: every relay's copy is delivered.
    pub dedupe_events: bool,
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
