//! Integration tests for the relay pool and subscription router
//!
//! These tests run small in-process WebSocket relays that answer every REQ
//! with a scripted set of events followed by EOSE.

mod lookup;
mod pool;
mod subscriptions;

use futures::{SinkExt, StreamExt};
use nostr_client::{PoolConfig, RelayPool, Router, RouterConfig};
use serde_json::{Value, json};
use std::sync::{Arc, Once};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init();
    });
}

/// Build a wiki article event with a deterministic id.
pub fn article(id_char: char, title: &str, summary: &str) -> Value {
    json!({
        "id": id_char.to_string().repeat(64),
        "pubkey": "f".repeat(64),
        "created_at": 1_700_000_000u64,
        "kind": 30818,
        "tags": [["d", title], ["summary", summary], ["t", "science"]],
        "content": format!("{} article body", title),
        "sig": "",
    })
}

/// A scripted relay listening on an ephemeral local port.
pub struct TestRelay {
    pub url: String,
    received: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl TestRelay {
    /// Start a relay that answers each REQ with `events` then EOSE.
    pub async fn start(events: Vec<Value>) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let received = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::new(events);

        let task = {
            let received = Arc::clone(&received);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, Arc::clone(&events), Arc::clone(&received)));
                }
            })
        };

        Self {
            url,
            received,
            task,
        }
    }

    /// Frames received from clients, in arrival order.
    pub async fn received(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }

    /// Wait until a received frame satisfies `predicate`.
    pub async fn wait_for_frame(&self, predicate: impl Fn(&str) -> bool) -> String {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if let Some(frame) = self.received().await.into_iter().find(|f| predicate(f)) {
                return frame;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "relay {} never received the expected frame",
                self.url
            );
            sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, events: Arc<Vec<Value>>, received: Arc<Mutex<Vec<String>>>) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut tx, mut rx) = ws_stream.split();

    while let Some(Ok(msg)) = rx.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        received.lock().await.push(text.as_str().to_string());

        let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        if value[0] != "REQ" {
            continue;
        }
        let subscription_id = value[1].clone();
        for event in events.iter() {
            let frame = json!(["EVENT", subscription_id, event]).to_string();
            if tx.send(Message::text(frame)).await.is_err() {
                return;
            }
        }
        let eose = json!(["EOSE", subscription_id]).to_string();
        if tx.send(Message::text(eose)).await.is_err() {
            return;
        }
    }
}

/// A ws:// address nothing is listening on.
pub async fn closed_relay_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);
    url
}

pub fn test_config() -> PoolConfig {
    PoolConfig::default()
        .with_connect_timeout(Duration::from_secs(2))
        .with_ready_timeout(WAIT)
}

/// Pool plus router with every given relay open.
pub async fn connected_router(urls: &[&str]) -> Router {
    let pool = Arc::new(RelayPool::new(test_config()));
    let router = Router::new(Arc::clone(&pool), RouterConfig::default())
        .await
        .unwrap();
    assert!(pool.connect_all(urls).await.is_ready());
    wait_for_open(&pool, urls.len()).await;
    router
}

pub async fn wait_for_open(pool: &RelayPool, count: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while pool.open_count().await < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "only {} of {} relays opened",
            pool.open_count().await,
            count
        );
        sleep(Duration::from_millis(20)).await;
    }
}
