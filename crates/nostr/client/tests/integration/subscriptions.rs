//! Subscription router integration tests

use super::*;
use nostr_client::{
    ChannelHandler, ClientError, Filter, MemoryConnector, SubscriptionKind, SubscriptionUpdate,
    recent_articles,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc::UnboundedReceiver;

async fn collect_until_all_eose(
    rx: &mut UnboundedReceiver<SubscriptionUpdate>,
) -> Vec<SubscriptionUpdate> {
    let mut updates = Vec::new();
    loop {
        let update = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for subscription updates")
            .expect("handler channel closed");
        if update == SubscriptionUpdate::AllEose {
            return updates;
        }
        updates.push(update);
    }
}

#[tokio::test]
async fn test_recent_articles_from_two_relays() {
    let relay_a = TestRelay::start(vec![article('a', "Rust", "A language")]).await;
    let relay_b = TestRelay::start(vec![article('b', "Go", "Another language")]).await;
    let router = connected_router(&[&relay_a.url, &relay_b.url]).await;

    let (handler, mut rx) = ChannelHandler::new();
    router
        .subscribe_with_kind(
            Filter::new().kinds(vec![30818]).limit(10),
            "recent-articles",
            SubscriptionKind::RecentArticles,
            handler,
        )
        .await
        .unwrap();

    let updates = collect_until_all_eose(&mut rx).await;
    let mut titles: Vec<String> = updates
        .iter()
        .map(|update| match update {
            SubscriptionUpdate::Event { event, .. } => event.title().unwrap_or("").to_string(),
            other => panic!("unexpected update {:?}", other),
        })
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Go".to_string(), "Rust".to_string()]);

    for relay in [&relay_a, &relay_b] {
        let req = relay
            .wait_for_frame(|f| f.starts_with(r#"["REQ","recent-articles""#))
            .await;
        assert_eq!(req, r#"["REQ","recent-articles",{"kinds":[30818],"limit":10}]"#);
    }

    router.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_event_delivered_per_relay() {
    let shared = article('c', "Physics", "Matter and energy");
    let relay_a = TestRelay::start(vec![shared.clone()]).await;
    let relay_b = TestRelay::start(vec![shared]).await;
    let router = connected_router(&[&relay_a.url, &relay_b.url]).await;

    let (handler, mut rx) = ChannelHandler::new();
    router
        .subscribe(recent_articles(10), "dupes", handler)
        .await
        .unwrap();

    let updates = collect_until_all_eose(&mut rx).await;
    let mut relays: Vec<String> = updates
        .into_iter()
        .filter_map(|update| match update {
            SubscriptionUpdate::Event { relay_url, event } => {
                assert_eq!(event.id, "c".repeat(64));
                Some(relay_url)
            }
            _ => None,
        })
        .collect();
    relays.sort();
    let mut expected = vec![relay_a.url.clone(), relay_b.url.clone()];
    expected.sort();
    assert_eq!(relays, expected);

    router.shutdown().await;
}

#[tokio::test]
async fn test_empty_result_signaled_once() {
    let relay_a = TestRelay::start(vec![]).await;
    let relay_b = TestRelay::start(vec![]).await;
    let router = connected_router(&[&relay_a.url, &relay_b.url]).await;

    let (handler, mut rx) = ChannelHandler::new();
    router
        .subscribe(recent_articles(10), "nothing-here", handler)
        .await
        .unwrap();

    let updates = collect_until_all_eose(&mut rx).await;
    assert_eq!(updates, vec![SubscriptionUpdate::EmptyResult]);

    router.shutdown().await;
}

#[tokio::test]
async fn test_subscribe_while_not_connected() {
    let relay = TestRelay::start(vec![article('a', "Rust", "A language")]).await;
    let pool = Arc::new(RelayPool::new(test_config()));
    let router = Router::new(Arc::clone(&pool), RouterConfig::default())
        .await
        .unwrap();

    let (handler, _rx) = ChannelHandler::new();
    let result = router.subscribe(recent_articles(10), "early", handler).await;
    assert!(matches!(result, Err(ClientError::NotConnected)));

    // Connecting afterwards does not replay the failed REQ
    assert!(pool.connect_all(&[&relay.url]).await.is_ready());
    sleep(Duration::from_millis(100)).await;
    assert!(relay.received().await.is_empty());

    router.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribe_sends_close() {
    let relay = TestRelay::start(vec![]).await;
    let router = connected_router(&[&relay.url]).await;

    let (info, mut rx) = router
        .subscribe_with_channel(recent_articles(5), SubscriptionKind::ComparePane(1))
        .await
        .unwrap();
    assert_eq!(info.kind, SubscriptionKind::ComparePane(1));
    collect_until_all_eose(&mut rx).await;

    assert!(router.unsubscribe(&info.id).await.unwrap());
    let close = relay
        .wait_for_frame(|f| f.starts_with(r#"["CLOSE""#))
        .await;
    assert_eq!(close, format!(r#"["CLOSE","{}"]"#, info.id));
    assert!(router.subscription_ids().await.is_empty());

    router.shutdown().await;
}

#[tokio::test]
async fn test_relay_list_change_ends_pending_subscription() {
    init_tracing();
    // A relay that accepts the REQ but never answers
    let connector = MemoryConnector::new();
    connector.accept("wss://silent.example");
    connector.accept("wss://fresh.example");

    let pool = Arc::new(RelayPool::with_connector(test_config(), connector.clone()));
    let router = Router::new(Arc::clone(&pool), RouterConfig::default())
        .await
        .unwrap();
    assert!(pool.connect_all(&["wss://silent.example"]).await.is_ready());
    wait_for_open(&pool, 1).await;

    let (info, mut rx) = router
        .subscribe_with_channel(recent_articles(5), SubscriptionKind::RecentArticles)
        .await
        .unwrap();
    let silent = connector.relay("wss://silent.example").unwrap();
    let req = silent.recv_sent(WAIT).await.unwrap();
    assert!(req.starts_with(&format!(r#"["REQ","{}""#, info.id)));

    // The user swaps the relay list
    assert!(pool.connect_all(&["wss://fresh.example"]).await.is_ready());
    assert_eq!(collect_until_all_eose(&mut rx).await, vec![]);

    // The old subscription is not replayed on the new relay
    wait_for_open(&pool, 1).await;
    let fresh = connector.relay("wss://fresh.example").unwrap();
    assert!(fresh.drain_sent().await.is_empty());

    router.shutdown().await;
}
