//! Single relay connection task
//!
//! Each relay endpoint gets one task that connects with a timeout and then
//! multiplexes its writer and reader halves. Inbound frames are forwarded in
//! arrival order to the pool's bounded frame channel; the task never parses
//! them.

use crate::error::{ConnectionError, ConnectionErrorKind};
use crate::pool::{PoolFrame, PoolShared};
use crate::transport::Connector;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Connect attempt in flight
    Connecting,
    /// Connected; receives broadcasts
    Open,
    /// Close requested, socket shutting down
    Closing,
    /// Disconnected or never connected
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Result of one connect attempt, reported once per task.
#[derive(Debug)]
pub(crate) struct ConnectAttempt {
    pub relay_url: String,
    pub result: Result<(), ConnectionError>,
}

/// Everything a connection task needs from its pool.
pub(crate) struct RelayTask {
    pub relay_url: String,
    pub url: Url,
    pub generation: u64,
    pub connector: Arc<dyn Connector>,
    pub connect_timeout: Duration,
    pub shared: Arc<PoolShared>,
}

impl RelayTask {
    /// Connect, then pump frames until either side goes away.
    ///
    /// Dropping the sender half of `outbound_rx` is how the pool asks the
    /// task to close.
    pub async fn run(
        self,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        attempts: mpsc::UnboundedSender<ConnectAttempt>,
    ) {
        info!("Connecting to relay: {}", self.relay_url);
        let connect_start = Instant::now();

        let connected = match timeout(self.connect_timeout, self.connector.connect(&self.url)).await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::timeout(self.connect_timeout)),
        };

        let (mut sink, mut stream) = match connected {
            Ok(halves) => halves,
            Err(e) => {
                warn!("Failed to connect to {}: {}", self.relay_url, e);
                self.shared
                    .mark_failed(&self.relay_url, self.generation, e.clone())
                    .await;
                let _ = attempts.send(ConnectAttempt {
                    relay_url: self.relay_url,
                    result: Err(e),
                });
                return;
            }
        };

        if !self.shared.mark_open(&self.relay_url, self.generation).await {
            debug!(
                "Relay {} opened after pool reset, closing",
                self.relay_url
            );
            let _ = sink.close().await;
            let _ = attempts.send(ConnectAttempt {
                relay_url: self.relay_url,
                result: Err(ConnectionError::new(
                    ConnectionErrorKind::Closed,
                    "pool was reset while connecting",
                )),
            });
            return;
        }

        info!(
            "Connected to relay: {} (took {:?})",
            self.relay_url,
            connect_start.elapsed()
        );
        let _ = attempts.send(ConnectAttempt {
            relay_url: self.relay_url.clone(),
            result: Ok(()),
        });
        drop(attempts);

        let frames_tx = self.shared.frames_tx.clone();

        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => match outbound {
                    Some(text) => {
                        if let Err(e) = sink.send(text).await {
                            warn!("Send to {} failed: {}", self.relay_url, e);
                            self.shared.record_error(&self.relay_url, self.generation, e.clone()).await;
                            if e.kind == ConnectionErrorKind::Closed {
                                break;
                            }
                        }
                    }
                    None => {
                        debug!("Close requested for {}", self.relay_url);
                        break;
                    }
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(text)) => {
                        let frame = PoolFrame::Message {
                            relay_url: self.relay_url.clone(),
                            generation: self.generation,
                            text,
                        };
                        if frames_tx.send(frame).await.is_err() {
                            debug!("Frame channel closed, stopping {}", self.relay_url);
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        // Errors are reported; the transport decides when the stream ends
                        warn!("WebSocket error from {}: {}", self.relay_url, e);
                        self.shared.record_error(&self.relay_url, self.generation, e.clone()).await;
                        if e.kind == ConnectionErrorKind::Closed {
                            break;
                        }
                    }
                    None => {
                        info!("Relay {} closed connection", self.relay_url);
                        break;
                    }
                },
            }
        }

        self.shared
            .set_state(&self.relay_url, self.generation, ConnectionState::Closing)
            .await;
        let _ = sink.close().await;

        if self.shared.mark_closed(&self.relay_url, self.generation).await {
            let _ = frames_tx
                .send(PoolFrame::Closed {
                    relay_url: self.relay_url,
                    generation: self.generation,
                })
                .await;
        }
    }
}
