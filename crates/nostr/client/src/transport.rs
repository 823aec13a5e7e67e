//! Transport seam between the pool and the network.
//!
//! A [`Connector`] opens one relay connection and hands back a text-frame
//! sink and stream. The pool never touches sockets directly, which keeps
//! lifecycle handling testable without a network.

use crate::error::ConnectionError;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use std::pin::Pin;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::debug;
use url::Url;

/// Outbound half of a relay connection: accepts JSON text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ConnectionError> + Send>>;

/// Inbound half of a relay connection: yields JSON text frames until the
/// relay closes the connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ConnectionError>> + Send>>;

/// Opens connections to relays.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `url`. The returned future is raced against the
    /// pool's connect timeout by the caller.
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), ConnectionError>;
}

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), ConnectionError> {
        let (ws_stream, response) = connect_async(url.as_str()).await?;
        debug!("WebSocket handshake with {} returned {}", url, response.status());

        let (sink, stream) = ws_stream.split();

        let sink = sink
            .with(|text: String| future::ready(Ok::<_, tungstenite::Error>(Message::text(text))))
            .sink_map_err(ConnectionError::from);

        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(msg @ Message::Text(_)) => msg.to_text().ok().map(|text| Ok(text.to_string())),
                // Ping/pong are answered by tungstenite, close ends the stream
                Ok(_) => None,
                Err(e) => Some(Err(ConnectionError::from(e))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Parse and validate a relay address.
pub fn parse_relay_url(address: &str) -> Result<Url, ConnectionError> {
    let url = Url::parse(address.trim())
        .map_err(|e| ConnectionError::invalid_url(format!("{}: {}", address, e)))?;

    // Validate WebSocket URL
    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(ConnectionError::invalid_url(format!(
            "URL must use ws:// or wss:// scheme, got: {}",
            url.scheme()
        )));
    }

    Ok(url)
}

#[cfg(any(test, feature = "test-support"))]
pub use memory::{MemoryBehavior, MemoryConnector, MemoryRelay};

#[cfg(any(test, feature = "test-support"))]
mod memory {
    use super::*;
    use crate::error::ConnectionErrorKind;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// How a [`MemoryConnector`] answers a connect attempt.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MemoryBehavior {
        /// Open an in-memory connection
        Accept,
        /// Fail immediately with the given error class
        Refuse(ConnectionErrorKind),
        /// Never finish connecting
        Hang,
    }

    /// In-memory connector for lifecycle tests.
    ///
    /// Addresses without a configured behavior are refused.
    #[derive(Default)]
    pub struct MemoryConnector {
        behaviors: Mutex<HashMap<String, MemoryBehavior>>,
        relays: Mutex<HashMap<String, Arc<MemoryRelay>>>,
    }

    impl MemoryConnector {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn set(&self, address: &str, behavior: MemoryBehavior) {
            if let Ok(url) = parse_relay_url(address) {
                self.behaviors
                    .lock()
                    .unwrap()
                    .insert(url.to_string(), behavior);
            }
        }

        pub fn accept(&self, address: &str) {
            self.set(address, MemoryBehavior::Accept);
        }

        pub fn refuse(&self, address: &str, kind: ConnectionErrorKind) {
            self.set(address, MemoryBehavior::Refuse(kind));
        }

        pub fn hang(&self, address: &str) {
            self.set(address, MemoryBehavior::Hang);
        }

        /// The remote end of the latest connection to `address`.
        pub fn relay(&self, address: &str) -> Option<Arc<MemoryRelay>> {
            let url = parse_relay_url(address).ok()?;
            self.relays.lock().unwrap().get(url.as_str()).cloned()
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), ConnectionError> {
            let behavior = self
                .behaviors
                .lock()
                .unwrap()
                .get(url.as_str())
                .cloned()
                .unwrap_or(MemoryBehavior::Refuse(ConnectionErrorKind::Refused));

            match behavior {
                MemoryBehavior::Accept => {}
                MemoryBehavior::Refuse(kind) => {
                    return Err(ConnectionError::new(kind, format!("{} refused", url)));
                }
                MemoryBehavior::Hang => future::pending::<()>().await,
            }

            let (sent_tx, sent_rx) = mpsc::unbounded_channel::<String>();
            let (inbound_tx, inbound_rx) =
                mpsc::unbounded_channel::<Result<String, ConnectionError>>();

            let relay = Arc::new(MemoryRelay {
                sent: tokio::sync::Mutex::new(sent_rx),
                inbound: Mutex::new(Some(inbound_tx)),
            });
            self.relays
                .lock()
                .unwrap()
                .insert(url.to_string(), relay);

            let sink = futures::sink::unfold(sent_tx, |tx, text: String| async move {
                tx.send(text)
                    .map_err(|_| ConnectionError::new(ConnectionErrorKind::Closed, "relay gone"))?;
                Ok::<_, ConnectionError>(tx)
            });
            let stream = futures::stream::unfold(inbound_rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });

            Ok((Box::pin(sink), Box::pin(stream)))
        }
    }

    /// Relay side of an in-memory connection.
    pub struct MemoryRelay {
        sent: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
        inbound: Mutex<Option<mpsc::UnboundedSender<Result<String, ConnectionError>>>>,
    }

    impl MemoryRelay {
        /// Push a text frame to the client.
        pub fn push(&self, frame: impl Into<String>) {
            if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
                let _ = tx.send(Ok(frame.into()));
            }
        }

        /// Push a transport error to the client without closing.
        pub fn push_error(&self, error: ConnectionError) {
            if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
                let _ = tx.send(Err(error));
            }
        }

        /// Close the connection from the relay side.
        pub fn close(&self) {
            self.inbound.lock().unwrap().take();
        }

        /// Next frame the client sent, waiting up to `wait`.
        pub async fn recv_sent(&self, wait: Duration) -> Option<String> {
            let mut rx = self.sent.lock().await;
            tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
        }

        /// Frames the client has sent so far, without waiting.
        pub async fn drain_sent(&self) -> Vec<String> {
            let mut rx = self.sent.lock().await;
            let mut frames = Vec::new();
            while let Ok(frame) = rx.try_recv() {
                frames.push(frame);
            }
            frames
        }
    }
}
