//! Relay pool for managing connections to multiple Nostr relays.
//!
//! The pool owns one connection task per relay endpoint. It becomes ready
//! as soon as the first relay opens, broadcasts frames to whatever is open at
//! the moment, and hands every inbound frame to the router over a single
//! bounded channel. Individual relay failures are logged, published as
//! [`PoolEvent::Error`], and otherwise contained.

use crate::config::PoolConfig;
use crate::error::{ConnectionError, ConnectionErrorKind, Result};
use crate::message::ClientMessage;
use crate::relay::{ConnectAttempt, ConnectionState, RelayTask};
use crate::transport::{Connector, WebSocketConnector, parse_relay_url};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events emitted by the relay pool.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// A relay connected
    Connected { relay_url: String },
    /// A relay disconnected
    Disconnected { relay_url: String },
    /// Connection error
    Error {
        relay_url: String,
        error: ConnectionError,
    },
    /// Notice from a relay
    Notice { relay_url: String, message: String },
    /// Aggregate readiness flipped, or a connect attempt ended with nothing open
    ReadinessChanged {
        ready: bool,
        diagnostic: Option<PoolDiagnostic>,
    },
    /// Aggregate, non-fatal diagnostic for one `connect_all` call
    Diagnostic(PoolDiagnostic),
}

/// Why the pool is not (fully) usable after a `connect_all` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolDiagnostic {
    #[error("no relays configured")]
    NoRelaysConfigured,

    #[error("all {attempted} relay connections failed")]
    AllConnectionsFailed { attempted: usize },

    /// A majority of attempts failed with the same class of error
    #[error("likely blocked by network policy ({failed} of {attempted} relays: {kind})")]
    LikelyBlocked {
        kind: ConnectionErrorKind,
        failed: usize,
        attempted: usize,
    },

    #[error("no relay became ready in time")]
    ReadyTimeout,
}

/// Outcome of [`RelayPool::connect_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// At least one relay is open; `relay_url` opened first
    Ready { relay_url: String },
    /// Nothing opened
    Unavailable(PoolDiagnostic),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Frame handed from connection tasks to the router.
#[derive(Debug)]
pub(crate) enum PoolFrame {
    Message {
        relay_url: String,
        generation: u64,
        text: String,
    },
    Closed {
        relay_url: String,
        generation: u64,
    },
}

struct RelayEntry {
    state: ConnectionState,
    /// Dropping this asks the connection task to close
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
    last_error: Option<ConnectionError>,
    generation: u64,
}

impl RelayEntry {
    fn closed(generation: u64, error: ConnectionError) -> Self {
        Self {
            state: ConnectionState::Closed,
            outbound: None,
            task: None,
            last_error: Some(error),
            generation,
        }
    }
}

/// State shared between the pool handle and its connection tasks.
pub(crate) struct PoolShared {
    relays: RwLock<HashMap<String, RelayEntry>>,
    generation: AtomicU64,
    events_tx: broadcast::Sender<PoolEvent>,
    ready_tx: watch::Sender<bool>,
    pub(crate) frames_tx: mpsc::Sender<PoolFrame>,
}

impl PoolShared {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, event: PoolEvent) {
        // No receivers is fine
        let _ = self.events_tx.send(event);
    }

    /// Recompute aggregate readiness after a change to the relay set.
    fn refresh_readiness(&self, relays: &HashMap<String, RelayEntry>) {
        let ready = relays.values().any(|entry| entry.state.is_open());
        let changed = self.ready_tx.send_if_modified(|current| {
            if *current != ready {
                *current = ready;
                true
            } else {
                false
            }
        });
        if changed {
            info!("Relay pool {}", if ready { "ready" } else { "not ready" });
            self.emit(PoolEvent::ReadinessChanged {
                ready,
                diagnostic: None,
            });
        }
    }

    /// Returns false when the entry belongs to an older `connect_all`.
    pub(crate) async fn mark_open(&self, relay_url: &str, generation: u64) -> bool {
        let mut relays = self.relays.write().await;
        match relays.get_mut(relay_url) {
            Some(entry) if entry.generation == generation => {
                entry.state = ConnectionState::Open;
                entry.last_error = None;
            }
            _ => return false,
        }
        self.emit(PoolEvent::Connected {
            relay_url: relay_url.to_string(),
        });
        self.refresh_readiness(&relays);
        true
    }

    pub(crate) async fn mark_failed(&self, relay_url: &str, generation: u64, error: ConnectionError) {
        let mut relays = self.relays.write().await;
        if let Some(entry) = relays.get_mut(relay_url)
            && entry.generation == generation
        {
            entry.state = ConnectionState::Closed;
            entry.outbound = None;
            entry.last_error = Some(error.clone());
            self.emit(PoolEvent::Error {
                relay_url: relay_url.to_string(),
                error,
            });
        }
    }

    /// Record an error that does not by itself close the connection.
    pub(crate) async fn record_error(&self, relay_url: &str, generation: u64, error: ConnectionError) {
        let mut relays = self.relays.write().await;
        if let Some(entry) = relays.get_mut(relay_url)
            && entry.generation == generation
        {
            entry.last_error = Some(error.clone());
            self.emit(PoolEvent::Error {
                relay_url: relay_url.to_string(),
                error,
            });
        }
    }

    pub(crate) async fn set_state(&self, relay_url: &str, generation: u64, state: ConnectionState) {
        let mut relays = self.relays.write().await;
        if let Some(entry) = relays.get_mut(relay_url)
            && entry.generation == generation
        {
            entry.state = state;
            self.refresh_readiness(&relays);
        }
    }

    /// Returns true when a current entry was closed.
    pub(crate) async fn mark_closed(&self, relay_url: &str, generation: u64) -> bool {
        let mut relays = self.relays.write().await;
        match relays.get_mut(relay_url) {
            Some(entry) if entry.generation == generation => {
                entry.state = ConnectionState::Closed;
                entry.outbound = None;
            }
            _ => return false,
        }
        info!("Relay {} disconnected", relay_url);
        self.emit(PoolEvent::Disconnected {
            relay_url: relay_url.to_string(),
        });
        self.refresh_readiness(&relays);
        true
    }
}

/// A pool of Nostr relay connections.
pub struct RelayPool {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<PoolShared>,
    /// Receiving end of the frame channel, claimed once by the router
    frames_rx: Mutex<Option<mpsc::Receiver<PoolFrame>>>,
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl RelayPool {
    /// Create a new relay pool over WebSockets.
    pub fn new(config: PoolConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    /// Create a relay pool with a custom transport.
    pub fn with_connector(config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, _) = broadcast::channel(config.event_buffer.max(1));
        let (frames_tx, frames_rx) = mpsc::channel(config.frame_buffer.max(1));
        let (ready_tx, _) = watch::channel(false);

        Self {
            config,
            connector,
            shared: Arc::new(PoolShared {
                relays: RwLock::new(HashMap::new()),
                generation: AtomicU64::new(0),
                events_tx,
                ready_tx,
                frames_tx,
            }),
            frames_rx: Mutex::new(Some(frames_rx)),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Subscribe to pool events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PoolEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Watch aggregate readiness (true while at least one relay is open).
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.shared.ready_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        *self.shared.ready_tx.borrow()
    }

    /// Get all relay URLs in the pool.
    pub async fn relay_urls(&self) -> Vec<String> {
        self.shared.relays.read().await.keys().cloned().collect()
    }

    /// Get connection states for all relays.
    pub async fn states(&self) -> HashMap<String, ConnectionState> {
        self.shared
            .relays
            .read()
            .await
            .iter()
            .map(|(url, entry)| (url.clone(), entry.state))
            .collect()
    }

    /// URLs of relays that are currently open.
    pub async fn open_relays(&self) -> Vec<String> {
        self.shared
            .relays
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.state.is_open())
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub async fn open_count(&self) -> usize {
        self.shared
            .relays
            .read()
            .await
            .values()
            .filter(|entry| entry.state.is_open())
            .count()
    }

    /// Last transport error seen for a relay.
    pub async fn last_error(&self, relay_url: &str) -> Option<ConnectionError> {
        self.shared
            .relays
            .read()
            .await
            .get(relay_url)
            .and_then(|entry| entry.last_error.clone())
    }

    /// Connect to every endpoint concurrently, replacing the current relay set.
    ///
    /// Resolves as soon as the first relay opens. When nothing opens, resolves
    /// with a diagnostic once every attempt has failed or `ready_timeout`
    /// elapses, whichever comes first.
    pub async fn connect_all<S: AsRef<str>>(&self, endpoints: &[S]) -> Readiness {
        let generation = self.reset().await;

        let mut seen = HashSet::new();
        let endpoints: Vec<String> = endpoints
            .iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();

        if endpoints.is_empty() {
            warn!("connect_all called with no relays");
            let diagnostic = PoolDiagnostic::NoRelaysConfigured;
            self.shared.emit(PoolEvent::ReadinessChanged {
                ready: false,
                diagnostic: Some(diagnostic.clone()),
            });
            self.shared.emit(PoolEvent::Diagnostic(diagnostic.clone()));
            return Readiness::Unavailable(diagnostic);
        }

        info!("Connecting to {} relays", endpoints.len());

        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
        {
            let mut relays = self.shared.relays.write().await;
            for relay_url in &endpoints {
                let url = match parse_relay_url(relay_url) {
                    Ok(url) => url,
                    Err(e) => {
                        warn!("Skipping relay {}: {}", relay_url, e);
                        relays.insert(relay_url.clone(), RelayEntry::closed(generation, e.clone()));
                        self.shared.emit(PoolEvent::Error {
                            relay_url: relay_url.clone(),
                            error: e.clone(),
                        });
                        let _ = attempts_tx.send(ConnectAttempt {
                            relay_url: relay_url.clone(),
                            result: Err(e),
                        });
                        continue;
                    }
                };

                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let task = RelayTask {
                    relay_url: relay_url.clone(),
                    url,
                    generation,
                    connector: Arc::clone(&self.connector),
                    connect_timeout: self.config.connect_timeout,
                    shared: Arc::clone(&self.shared),
                };
                // The task blocks on the write lock held here until the entry exists
                let handle = tokio::spawn(task.run(outbound_rx, attempts_tx.clone()));
                relays.insert(
                    relay_url.clone(),
                    RelayEntry {
                        state: ConnectionState::Connecting,
                        outbound: Some(outbound_tx),
                        task: Some(handle),
                        last_error: None,
                        generation,
                    },
                );
            }
        }
        drop(attempts_tx);

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(aggregate_attempts(
            Arc::clone(&self.shared),
            generation,
            endpoints.len(),
            attempts_rx,
            ready_tx,
        ));

        match tokio::time::timeout(self.config.ready_timeout, ready_rx).await {
            Ok(Ok(readiness)) => readiness,
            Ok(Err(_)) => Readiness::Unavailable(PoolDiagnostic::AllConnectionsFailed {
                attempted: endpoints.len(),
            }),
            Err(_) => {
                warn!(
                    "No relay ready after {:?}",
                    self.config.ready_timeout
                );
                Readiness::Unavailable(PoolDiagnostic::ReadyTimeout)
            }
        }
    }

    /// Send a frame to every open relay. Returns the relays it was handed to.
    ///
    /// Relays that are connecting, closing or closed are skipped; nothing is
    /// queued for them.
    pub async fn broadcast(&self, message: &ClientMessage) -> Result<Vec<String>> {
        Ok(self
            .broadcast_tagged(message)
            .await?
            .into_iter()
            .map(|(url, _)| url)
            .collect())
    }

    /// Like [`RelayPool::broadcast`], with the generation of each connection
    /// the frame went to.
    pub(crate) async fn broadcast_tagged(
        &self,
        message: &ClientMessage,
    ) -> Result<Vec<(String, u64)>> {
        let text = message.to_json()?;
        let relays = self.shared.relays.read().await;

        let mut sent = Vec::new();
        for (url, entry) in relays.iter() {
            if !entry.state.is_open() {
                continue;
            }
            if let Some(outbound) = &entry.outbound
                && outbound.send(text.clone()).is_ok()
            {
                sent.push((url.clone(), entry.generation));
            }
        }

        debug!("Broadcast to {} relays", sent.len());
        Ok(sent)
    }

    /// Close every connection and forget all relays. No-op when already empty.
    pub async fn disconnect_all(&self) {
        self.reset().await;
    }

    /// Close one relay and forget it.
    ///
    /// Returns false if the relay was not in the pool.
    pub async fn remove_relay(&self, relay_url: &str) -> bool {
        let mut relays = self.shared.relays.write().await;
        let Some(entry) = relays.remove(relay_url) else {
            return false;
        };
        info!("Removing relay from pool: {}", relay_url);
        self.reap(entry.task.into_iter().collect());
        self.shared.refresh_readiness(&relays);
        drop(relays);

        self.notify_removed(vec![(relay_url.to_string(), entry.generation)]);
        true
    }

    /// Whether a frame from this relay and generation may still be delivered.
    pub(crate) async fn accepts(&self, relay_url: &str, generation: u64) -> bool {
        self.shared
            .relays
            .read()
            .await
            .get(relay_url)
            .is_some_and(|entry| entry.generation == generation)
    }

    /// Claim the inbound frame channel. Only one consumer may exist.
    pub(crate) async fn take_frames(&self) -> Option<mpsc::Receiver<PoolFrame>> {
        self.frames_rx.lock().await.take()
    }

    pub(crate) fn emit(&self, event: PoolEvent) {
        self.shared.emit(event);
    }

    /// Invalidate the current relay set and return the new generation.
    async fn reset(&self) -> u64 {
        let mut relays = self.shared.relays.write().await;
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut removed = Vec::with_capacity(relays.len());
        if !relays.is_empty() {
            info!("Disconnecting from {} relays", relays.len());
            let mut tasks = Vec::with_capacity(relays.len());
            for (url, entry) in relays.drain() {
                removed.push((url, entry.generation));
                tasks.extend(entry.task);
            }
            self.reap(tasks);
        }
        self.shared.refresh_readiness(&relays);
        drop(relays);

        self.notify_removed(removed);
        generation
    }

    /// Tell the router that these connections are gone.
    ///
    /// Their tasks can no longer report a close themselves. Sent from a
    /// separate task so a full frame channel never blocks the caller.
    fn notify_removed(&self, removed: Vec<(String, u64)>) {
        if removed.is_empty() {
            return;
        }
        let frames_tx = self.shared.frames_tx.clone();
        tokio::spawn(async move {
            for (relay_url, generation) in removed {
                let frame = PoolFrame::Closed {
                    relay_url,
                    generation,
                };
                if frames_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });
    }

    /// Give closing tasks a grace period to finish, then abort them.
    fn reap(&self, tasks: Vec<JoinHandle<()>>) {
        if tasks.is_empty() {
            return;
        }
        let grace = self.config.close_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            for task in tasks {
                task.abort();
            }
        });
    }
}

/// Collect one attempt per endpoint, resolve readiness, and raise at most one
/// aggregate diagnostic for the `connect_all` call.
async fn aggregate_attempts(
    shared: Arc<PoolShared>,
    generation: u64,
    attempted: usize,
    mut attempts: mpsc::UnboundedReceiver<ConnectAttempt>,
    ready_tx: oneshot::Sender<Readiness>,
) {
    let mut ready_tx = Some(ready_tx);
    let mut succeeded = 0usize;
    let mut failures: HashMap<ConnectionErrorKind, usize> = HashMap::new();

    while let Some(attempt) = attempts.recv().await {
        match attempt.result {
            Ok(()) => {
                succeeded += 1;
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Readiness::Ready {
                        relay_url: attempt.relay_url,
                    });
                }
            }
            Err(e) => {
                *failures.entry(e.kind).or_default() += 1;
            }
        }
    }

    if shared.current_generation() != generation {
        debug!("Discarding connect results for stale generation {}", generation);
        return;
    }

    let failed: usize = failures.values().sum();
    let dominant = failures.into_iter().max_by_key(|(_, count)| *count);

    let diagnostic = match dominant {
        Some((kind, count)) if count * 2 > attempted => Some(PoolDiagnostic::LikelyBlocked {
            kind,
            failed: count,
            attempted,
        }),
        _ if succeeded == 0 => Some(PoolDiagnostic::AllConnectionsFailed { attempted }),
        _ => None,
    };

    if let Some(diagnostic) = diagnostic {
        warn!(
            "Relay pool diagnostic: {} ({} of {} failed)",
            diagnostic, failed, attempted
        );
        if succeeded == 0 {
            shared.emit(PoolEvent::ReadinessChanged {
                ready: false,
                diagnostic: Some(diagnostic.clone()),
            });
        }
        shared.emit(PoolEvent::Diagnostic(diagnostic.clone()));
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Readiness::Unavailable(diagnostic));
        }
    }
}
