//! Subscription router
//!
//! Multiplexes REQ frames over a [`RelayPool`] and routes inbound frames back
//! to the consumer registered for each subscription id. All frames from all
//! relays pass through a single dispatch task, so registry updates are
//! serialized while each relay's frames keep their arrival order.

use crate::config::RouterConfig;
use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, Filter, RelayMessage};
use crate::pool::{PoolEvent, PoolFrame, RelayPool};
use crate::subscription::{
    SubscriptionInfo, SubscriptionKind, SubscriptionState, SubscriptionTracker,
    generate_subscription_id,
};
use nostr::{Event, validate_event};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Consumer of one subscription's results.
///
/// Callbacks run on the router's dispatch task and must not block.
pub trait SubscriptionHandler: Send + Sync + 'static {
    /// An event arrived. Each relay's copy is delivered unless
    /// [`RouterConfig::dedupe_events`] is set.
    fn on_event(&self, info: &SubscriptionInfo, relay_url: &str, event: &Event);

    /// End of stored events arrived before any event. Called at most once.
    fn on_empty_result(&self, info: &SubscriptionInfo);

    /// Every relay that received the REQ has finished.
    fn on_all_eose(&self, _info: &SubscriptionInfo) {}

    /// A relay refused or ended the subscription.
    fn on_closed(&self, _info: &SubscriptionInfo, _relay_url: &str, _message: &str) {}
}

/// Update forwarded by a [`ChannelHandler`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionUpdate {
    Event { relay_url: String, event: Event },
    EmptyResult,
    AllEose,
    Closed { relay_url: String, message: String },
}

/// Handler that forwards every callback into an unbounded channel.
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<SubscriptionUpdate>,
}

impl ChannelHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SubscriptionUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn forward(&self, info: &SubscriptionInfo, update: SubscriptionUpdate) {
        if self.tx.send(update).is_err() {
            debug!("Subscription {} receiver dropped", info.id);
        }
    }
}

impl SubscriptionHandler for ChannelHandler {
    fn on_event(&self, info: &SubscriptionInfo, relay_url: &str, event: &Event) {
        self.forward(
            info,
            SubscriptionUpdate::Event {
                relay_url: relay_url.to_string(),
                event: event.clone(),
            },
        );
    }

    fn on_empty_result(&self, info: &SubscriptionInfo) {
        self.forward(info, SubscriptionUpdate::EmptyResult);
    }

    fn on_all_eose(&self, info: &SubscriptionInfo) {
        self.forward(info, SubscriptionUpdate::AllEose);
    }

    fn on_closed(&self, info: &SubscriptionInfo, relay_url: &str, message: &str) {
        self.forward(
            info,
            SubscriptionUpdate::Closed {
                relay_url: relay_url.to_string(),
                message: message.to_string(),
            },
        );
    }
}

struct Registered {
    info: SubscriptionInfo,
    tracker: SubscriptionTracker,
    handler: Arc<dyn SubscriptionHandler>,
    /// Connection generation each relay had when the REQ went out
    sent: HashMap<String, u64>,
}

type Registry = Arc<Mutex<HashMap<String, Registered>>>;

/// Routes subscriptions over a relay pool.
pub struct Router {
    pool: Arc<RelayPool>,
    config: RouterConfig,
    subscriptions: Registry,
    /// Held while a frame is dispatched; taking it fences off delivery
    gate: Arc<Mutex<()>>,
    dispatch: JoinHandle<()>,
}

impl Router {
    /// Create a router and start its dispatch task.
    ///
    /// A pool feeds exactly one router; a second call for the same pool fails.
    pub async fn new(pool: Arc<RelayPool>, config: RouterConfig) -> Result<Self> {
        let frames = pool
            .take_frames()
            .await
            .ok_or_else(|| ClientError::Internal("relay pool already has a router".to_string()))?;

        let subscriptions: Registry = Arc::new(Mutex::new(HashMap::new()));
        let gate = Arc::new(Mutex::new(()));

        let dispatcher = Dispatcher {
            pool: Arc::clone(&pool),
            subscriptions: Arc::clone(&subscriptions),
            gate: Arc::clone(&gate),
            dedupe: config.dedupe_events,
        };
        let dispatch = tokio::spawn(dispatcher.run(frames));

        Ok(Self {
            pool,
            config,
            subscriptions,
            gate,
            dispatch,
        })
    }

    pub fn pool(&self) -> &Arc<RelayPool> {
        &self.pool
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Subscribe under a caller-chosen id.
    ///
    /// Fails with [`ClientError::NotConnected`] without sending anything when
    /// the pool is not ready. Reusing a live id replaces its consumer and
    /// resets its counters.
    pub async fn subscribe(
        &self,
        filter: Filter,
        subscription_id: impl Into<String>,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<SubscriptionInfo> {
        self.subscribe_with_kind(filter, subscription_id, SubscriptionKind::Default, handler)
            .await
    }

    /// Subscribe with an explicit [`SubscriptionKind`] tag.
    pub async fn subscribe_with_kind(
        &self,
        filter: Filter,
        subscription_id: impl Into<String>,
        kind: SubscriptionKind,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<SubscriptionInfo> {
        let id = subscription_id.into();
        if id.is_empty() {
            return Err(ClientError::Subscription(
                "subscription id must not be empty".to_string(),
            ));
        }
        if !self.pool.is_ready() {
            return Err(ClientError::NotConnected);
        }

        // Nothing is dispatched until the relay set is recorded
        let _gate = self.gate.lock().await;

        let info = SubscriptionInfo::new(id.clone(), kind);
        self.subscriptions.lock().await.insert(
            id.clone(),
            Registered {
                info: info.clone(),
                tracker: SubscriptionTracker::new(id.clone(), filter.clone()),
                handler,
                sent: HashMap::new(),
            },
        );

        let req = ClientMessage::req(id.clone(), filter);
        let sent = match self.pool.broadcast_tagged(&req).await {
            Ok(sent) => sent,
            Err(e) => {
                self.subscriptions.lock().await.remove(&id);
                return Err(e);
            }
        };

        let mut subscriptions = self.subscriptions.lock().await;
        if sent.is_empty() {
            subscriptions.remove(&id);
            return Err(ClientError::NotConnected);
        }
        if let Some(registered) = subscriptions.get_mut(&id) {
            for (relay_url, generation) in &sent {
                registered.tracker.add_relay(relay_url.as_str());
                registered.sent.insert(relay_url.clone(), *generation);
            }
        }

        info!(
            "Subscription {} ({}) sent to {} relays",
            id,
            info.kind,
            sent.len()
        );
        Ok(info)
    }

    /// Subscribe under a generated 8-character id.
    pub async fn subscribe_all(
        &self,
        filter: Filter,
        kind: SubscriptionKind,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<SubscriptionInfo> {
        self.subscribe_with_kind(filter, generate_subscription_id(), kind, handler)
            .await
    }

    /// Subscribe under a generated id and receive updates over a channel.
    pub async fn subscribe_with_channel(
        &self,
        filter: Filter,
        kind: SubscriptionKind,
    ) -> Result<(SubscriptionInfo, mpsc::UnboundedReceiver<SubscriptionUpdate>)> {
        let (handler, rx) = ChannelHandler::new();
        let info = self.subscribe_all(filter, kind, handler).await?;
        Ok((info, rx))
    }

    /// Stop delivery for a subscription and send CLOSE to open relays.
    ///
    /// Returns false if the id was not registered.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<bool> {
        let _gate = self.gate.lock().await;
        let removed = self.subscriptions.lock().await.remove(subscription_id);
        if removed.is_none() {
            return Ok(false);
        }

        info!("Closing subscription {}", subscription_id);
        if self.pool.is_ready() {
            self.pool
                .broadcast(&ClientMessage::close(subscription_id))
                .await?;
        }
        Ok(true)
    }

    /// Disconnect every relay and drop all subscriptions.
    ///
    /// No frame is delivered to a consumer once this returns.
    pub async fn disconnect_all(&self) {
        let _gate = self.gate.lock().await;
        self.subscriptions.lock().await.clear();
        self.pool.disconnect_all().await;
    }

    /// Disconnect and stop the dispatch task.
    pub async fn shutdown(&self) {
        self.disconnect_all().await;
        self.dispatch.abort();
    }

    /// Ids of live subscriptions.
    pub async fn subscription_ids(&self) -> Vec<String> {
        self.subscriptions.lock().await.keys().cloned().collect()
    }

    pub async fn state(&self, subscription_id: &str) -> Option<SubscriptionState> {
        self.subscriptions
            .lock()
            .await
            .get(subscription_id)
            .map(|registered| registered.tracker.state())
    }

    /// Events delivered for a subscription so far.
    pub async fn events_received(&self, subscription_id: &str) -> Option<u64> {
        self.subscriptions
            .lock()
            .await
            .get(subscription_id)
            .map(|registered| registered.tracker.events_received)
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}

/// Callback owed to a consumer, computed under the registry lock and run
/// after it is released.
enum Delivery {
    Event(Event),
    Empty,
    AllEose,
    Closed(String),
}

struct Dispatcher {
    pool: Arc<RelayPool>,
    subscriptions: Registry,
    gate: Arc<Mutex<()>>,
    dedupe: bool,
}

impl Dispatcher {
    async fn run(self, mut frames: mpsc::Receiver<PoolFrame>) {
        while let Some(frame) = frames.recv().await {
            let _gate = self.gate.lock().await;
            match frame {
                PoolFrame::Message {
                    relay_url,
                    generation,
                    text,
                } => {
                    if !self.pool.accepts(&relay_url, generation).await {
                        debug!("Dropping frame from disconnected relay {}", relay_url);
                        continue;
                    }
                    match RelayMessage::from_json(&text) {
                        Ok(message) => self.dispatch(&relay_url, message).await,
                        Err(e) => warn!("Failed to parse message from {}: {}", relay_url, e),
                    }
                }
                PoolFrame::Closed {
                    relay_url,
                    generation,
                } => self.relay_closed(&relay_url, generation).await,
            }
        }
        debug!("Router dispatch stopped");
    }

    async fn dispatch(&self, relay_url: &str, message: RelayMessage) {
        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                if !validate_event(&event) {
                    warn!(
                        "Dropping malformed event from {} for {}",
                        relay_url, subscription_id
                    );
                    return;
                }
                self.deliver(&subscription_id, relay_url, |tracker, dedupe| {
                    if tracker.record_event(relay_url, &event.id, dedupe) {
                        vec![Delivery::Event(event)]
                    } else {
                        debug!("Duplicate event {} for {}", event.id, tracker.id);
                        Vec::new()
                    }
                })
                .await;
            }
            RelayMessage::Eose { subscription_id } => {
                debug!("EOSE from {} for {}", relay_url, subscription_id);
                self.deliver(&subscription_id, relay_url, |tracker, _| {
                    let outcome = tracker.mark_eose(relay_url);
                    let mut deliveries = Vec::new();
                    if outcome.signal_empty {
                        deliveries.push(Delivery::Empty);
                    }
                    if outcome.all_eose {
                        deliveries.push(Delivery::AllEose);
                    }
                    deliveries
                })
                .await;
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                info!(
                    "Relay {} closed subscription {}: {}",
                    relay_url, subscription_id, message
                );
                self.deliver(&subscription_id, relay_url, |tracker, _| {
                    let mut deliveries = vec![Delivery::Closed(message)];
                    if tracker.mark_closed(relay_url) {
                        deliveries.push(Delivery::AllEose);
                    }
                    deliveries
                })
                .await;
            }
            RelayMessage::Notice {
                subscription_id,
                message,
            } => {
                match subscription_id {
                    Some(id) => warn!("Notice from {} ({}): {}", relay_url, id, message),
                    None => warn!("Notice from {}: {}", relay_url, message),
                }
                self.pool.emit(PoolEvent::Notice {
                    relay_url: relay_url.to_string(),
                    message,
                });
            }
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => {
                debug!(
                    "OK from {} for {}: {} {}",
                    relay_url, event_id, success, message
                );
            }
        }
    }

    /// Update one subscription under the registry lock, then run the
    /// resulting callbacks without it.
    async fn deliver<F>(&self, subscription_id: &str, relay_url: &str, update: F)
    where
        F: FnOnce(&mut SubscriptionTracker, bool) -> Vec<Delivery>,
    {
        let (info, handler, deliveries) = {
            let mut subscriptions = self.subscriptions.lock().await;
            let Some(registered) = subscriptions.get_mut(subscription_id) else {
                debug!(
                    "Frame from {} for unknown subscription {}",
                    relay_url, subscription_id
                );
                return;
            };
            let deliveries = update(&mut registered.tracker, self.dedupe);
            (
                registered.info.clone(),
                Arc::clone(&registered.handler),
                deliveries,
            )
        };

        for delivery in deliveries {
            match delivery {
                Delivery::Event(event) => handler.on_event(&info, relay_url, &event),
                Delivery::Empty => handler.on_empty_result(&info),
                Delivery::AllEose => handler.on_all_eose(&info),
                Delivery::Closed(message) => handler.on_closed(&info, relay_url, &message),
            }
        }
    }

    /// A relay connection closed or was removed from the pool.
    ///
    /// Only subscriptions whose REQ went to that same connection stop
    /// waiting for it; a reconnect under the same URL is left alone.
    async fn relay_closed(&self, relay_url: &str, generation: u64) {
        let completed: Vec<_> = {
            let mut subscriptions = self.subscriptions.lock().await;
            subscriptions
                .values_mut()
                .filter(|registered| registered.sent.get(relay_url) == Some(&generation))
                .filter_map(|registered| {
                    registered.sent.remove(relay_url);
                    registered
                        .tracker
                        .remove_relay(relay_url)
                        .then(|| (registered.info.clone(), Arc::clone(&registered.handler)))
                })
                .collect()
        };

        for (info, handler) in completed {
            handler.on_all_eose(&info);
        }
    }
}
