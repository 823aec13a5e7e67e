//! Nostr relay client for reading wiki articles.
//!
//! This crate provides:
//! - A relay pool that connects to many relays concurrently and is ready as
//!   soon as the first one opens
//! - Message parsing (NIP-01 relay protocol)
//! - A subscription router that fans relay results back to per-subscription
//!   handlers
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr_client::{ChannelHandler, RelayPool, Router, RouterConfig, SubscriptionKind};
//! use nostr_client::{PoolConfig, SubscriptionUpdate, recent_articles};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> nostr_client::Result<()> {
//!     let pool = Arc::new(RelayPool::new(PoolConfig::default()));
//!     let router = Router::new(Arc::clone(&pool), RouterConfig::default()).await?;
//!
//!     // Ready as soon as one relay opens
//!     let readiness = pool.connect_all(&["wss://relay.damus.io", "wss://nos.lol"]).await;
//!     println!("{:?}", readiness);
//!
//!     let (handler, mut updates) = ChannelHandler::new();
//!     router
//!         .subscribe_with_kind(
//!             recent_articles(10),
//!             "recent-articles",
//!             SubscriptionKind::RecentArticles,
//!             handler,
//!         )
//!         .await?;
//!
//!     while let Some(update) = updates.recv().await {
//!         match update {
//!             SubscriptionUpdate::Event { event, .. } => {
//!                 println!("{}", event.title().unwrap_or("untitled"));
//!             }
//!             SubscriptionUpdate::EmptyResult => println!("No articles"),
//!             SubscriptionUpdate::AllEose => break,
//!             _ => {}
//!         }
//!     }
//!
//!     router.shutdown().await;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod message;
mod pool;
mod relay;
mod router;
mod subscription;
mod transport;

use std::sync::Arc;

// Re-export main types
pub use config::{PoolConfig, RouterConfig};
pub use error::{ClientError, ConnectionError, ConnectionErrorKind, Result};
pub use message::{ClientMessage, Filter, MessageError, RelayMessage};
pub use pool::{PoolDiagnostic, PoolEvent, Readiness, RelayPool};
pub use relay::ConnectionState;
pub use router::{ChannelHandler, Router, SubscriptionHandler, SubscriptionUpdate};
pub use subscription::{
    EoseOutcome, SubscriptionInfo, SubscriptionKind, SubscriptionState, SubscriptionTracker,
    article_by_id, articles_in_category, generate_subscription_id, recent_articles,
    search_articles,
};
pub use transport::{Connector, FrameSink, FrameStream, WebSocketConnector, parse_relay_url};

#[cfg(any(test, feature = "test-support"))]
pub use transport::{MemoryBehavior, MemoryConnector, MemoryRelay};

/// Default relays for the wiki reader.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://relay.wikifreedia.xyz",
];

/// Create a pool and router pair and connect to the default relays.
pub async fn default_router() -> Result<(Router, Readiness)> {
    let pool = Arc::new(RelayPool::default());
    let router = Router::new(Arc::clone(&pool), RouterConfig::default()).await?;
    let readiness = pool.connect_all(DEFAULT_RELAYS).await;
    Ok((router, readiness))
}
