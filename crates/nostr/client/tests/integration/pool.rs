//! Relay pool integration tests

use super::*;
use nostr_client::{
    ClientMessage, ConnectionErrorKind, ConnectionState, Filter, PoolDiagnostic, PoolEvent,
    Readiness,
};

#[tokio::test]
async fn test_pool_ready_with_two_relays() {
    let relay_a = TestRelay::start(vec![]).await;
    let relay_b = TestRelay::start(vec![]).await;

    let pool = RelayPool::new(test_config());
    let readiness = pool.connect_all(&[&relay_a.url, &relay_b.url]).await;
    assert!(readiness.is_ready());

    wait_for_open(&pool, 2).await;
    let mut open = pool.open_relays().await;
    open.sort();
    let mut expected = vec![relay_a.url.clone(), relay_b.url.clone()];
    expected.sort();
    assert_eq!(open, expected);

    pool.disconnect_all().await;
    assert!(!pool.is_ready());
}

#[tokio::test]
async fn test_failed_relay_does_not_block_ready() {
    let relay = TestRelay::start(vec![]).await;
    let dead = closed_relay_url().await;

    let pool = RelayPool::new(test_config());
    let readiness = pool.connect_all(&[relay.url.as_str(), dead.as_str()]).await;
    assert_eq!(
        readiness,
        Readiness::Ready {
            relay_url: relay.url.clone()
        }
    );

    let message = ClientMessage::req("only-open", Filter::new().kinds(vec![30818]).limit(1));
    let sent = pool.broadcast(&message).await.unwrap();
    assert_eq!(sent, vec![relay.url.clone()]);
    relay
        .wait_for_frame(|f| f.starts_with(r#"["REQ","only-open""#))
        .await;

    // The dead relay settles as closed with a refused error
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if pool.states().await.get(&dead) == Some(&ConnectionState::Closed) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        pool.last_error(&dead).await.unwrap().kind,
        ConnectionErrorKind::Refused
    );

    pool.disconnect_all().await;
}

#[tokio::test]
async fn test_all_refused_reports_likely_blocked() {
    init_tracing();
    let dead_a = closed_relay_url().await;
    let dead_b = closed_relay_url().await;

    let pool = RelayPool::new(test_config());
    let mut events = pool.subscribe_events();
    let readiness = pool.connect_all(&[dead_a, dead_b]).await;

    assert_eq!(
        readiness,
        Readiness::Unavailable(PoolDiagnostic::LikelyBlocked {
            kind: ConnectionErrorKind::Refused,
            failed: 2,
            attempted: 2,
        })
    );

    let mut diagnostics = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PoolEvent::Diagnostic(_)) {
            diagnostics += 1;
        }
    }
    assert_eq!(diagnostics, 1);
}

#[tokio::test]
async fn test_disconnect_all_flips_readiness() {
    let relay = TestRelay::start(vec![]).await;
    let pool = RelayPool::new(test_config());
    let mut readiness = pool.readiness();

    assert!(pool.connect_all(&[&relay.url]).await.is_ready());
    assert!(*readiness.borrow_and_update());

    pool.disconnect_all().await;
    tokio::time::timeout(WAIT, readiness.wait_for(|ready| !ready))
        .await
        .unwrap()
        .unwrap();
    assert!(pool.relay_urls().await.is_empty());

    // Reconnecting is just another connect_all
    assert!(pool.connect_all(&[&relay.url]).await.is_ready());
    pool.disconnect_all().await;
}
