//! Identifier lookup: decode a user-facing id, then fetch the article

use super::*;
use nostr::{encode_nevent, encode_note, parse_identifier};
use nostr_client::{ChannelHandler, SubscriptionKind, SubscriptionUpdate, article_by_id};

#[tokio::test]
async fn test_lookup_by_note_and_nevent() {
    let relay = TestRelay::start(vec![article('e', "Chemistry", "Reactions")]).await;
    let router = connected_router(&[&relay.url]).await;

    let key = [0xee_u8; 32];
    let note = encode_note(&key).unwrap();
    let nevent = encode_nevent(&key, &[relay.url.as_str()]).unwrap();

    for identifier in [note, nevent, "e".repeat(64)] {
        let id = parse_identifier(&identifier).expect("identifier should decode");
        assert_eq!(id, "e".repeat(64));

        let (handler, mut rx) = ChannelHandler::new();
        router
            .subscribe_with_kind(
                article_by_id(id.clone()),
                format!("lookup-{}", &identifier[..8]),
                SubscriptionKind::ArticleLookup,
                handler,
            )
            .await
            .unwrap();

        let update = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        match update {
            SubscriptionUpdate::Event { event, .. } => {
                assert_eq!(event.id, id);
                assert_eq!(event.summary(), Some("Reactions"));
            }
            other => panic!("unexpected update {:?}", other),
        }
    }

    assert_eq!(parse_identifier("npub1notsupported"), None);
    router.shutdown().await;
}
