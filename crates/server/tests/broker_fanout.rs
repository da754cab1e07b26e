use std::sync::Arc;

use convo_server::auth::AuthManager;
use convo_server::db;
use convo_server::directory::ConversationDirectory;
use convo_server::models::User;
use convo_server::realtime::{should_deliver, RoomEvent, RoomRegistry, ServerEvent};
use convo_server::store::MessageStore;
use tempfile::tempdir;
use uuid::Uuid;

async fn seed_conversation() -> (Arc<MessageStore>, User, User, String, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let pool = db::connect(&dir.path().join("chat.sqlite")).await.unwrap();

    let auth = AuthManager::new(pool.clone(), "test-secret").await.unwrap();
    let directory = ConversationDirectory::new(pool.clone()).await.unwrap();
    let store = Arc::new(MessageStore::new(pool).await.unwrap());

    let (_, alice) = auth
        .register(
            "alice@example.com".into(),
            "pw123456".into(),
            Some("Alice".into()),
            None,
        )
        .await
        .unwrap();
    let (_, bob) = auth
        .register(
            "bob@example.com".into(),
            "pw123456".into(),
            Some("Bob".into()),
            None,
        )
        .await
        .unwrap();

    let conversation = directory
        .create_one_to_one(&alice.id, &bob.id)
        .await
        .unwrap();

    (store, alice, bob, conversation.id, dir)
}

#[tokio::test]
async fn test_send_persists_once_and_reaches_every_room_subscriber() {
    let (store, alice, _bob, room_id, _dir) = seed_conversation().await;
    let registry = RoomRegistry::new();

    // Two connections in the room (one of them the sender's), one elsewhere.
    let sender_conn = Uuid::new_v4();
    let mut rx_sender = registry.subscribe(&room_id).await;
    let mut rx_peer = registry.subscribe(&room_id).await;
    let mut rx_elsewhere = registry.subscribe("another-room").await;

    // What the socket loop does for message:send: persist, then fan out.
    let message = store.append(&alice.id, &room_id, "hello room").await.unwrap();
    let delivered = registry
        .broadcast(
            &room_id,
            RoomEvent {
                origin: sender_conn,
                event: ServerEvent::MessageNew {
                    message: message.clone(),
                },
            },
        )
        .await;

    assert_eq!(delivered, 2);

    // Exactly one persisted row.
    let history = store.history(&room_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "hello room");
    assert_eq!(history[0].sender.display_name.as_deref(), Some("Alice"));

    // Exactly one message:new per subscribed connection, the sender's own
    // connection included.
    for rx in [&mut rx_sender, &mut rx_peer] {
        let update = rx.try_recv().unwrap();
        assert!(should_deliver(&update, sender_conn));
        match update.event {
            ServerEvent::MessageNew { message: m } => assert_eq!(m.id, message.id),
            other => panic!("expected message:new, got {:?}", other),
        }
        assert!(rx.try_recv().is_err(), "at most one delivery per event");
    }

    assert!(rx_elsewhere.try_recv().is_err());
}

#[tokio::test]
async fn test_typing_events_skip_the_sender_connection() {
    let (_store, alice, _bob, room_id, _dir) = seed_conversation().await;
    let registry = RoomRegistry::new();

    let typist_conn = Uuid::new_v4();
    let peer_conn = Uuid::new_v4();
    let mut rx_typist = registry.subscribe(&room_id).await;
    let mut rx_peer = registry.subscribe(&room_id).await;

    registry
        .broadcast(
            &room_id,
            RoomEvent {
                origin: typist_conn,
                event: ServerEvent::TypingStart {
                    conversation_id: room_id.clone(),
                    user_id: alice.id.clone(),
                },
            },
        )
        .await;

    // The channel hands the event to both; the forwarder filter drops it
    // for the originating connection only.
    let at_typist = rx_typist.try_recv().unwrap();
    assert!(!should_deliver(&at_typist, typist_conn));

    let at_peer = rx_peer.try_recv().unwrap();
    assert!(should_deliver(&at_peer, peer_conn));
}

#[tokio::test]
async fn test_disconnect_drops_the_subscription() {
    let (_store, alice, _bob, room_id, _dir) = seed_conversation().await;
    let registry = RoomRegistry::new();

    let rx = registry.subscribe(&room_id).await;
    assert_eq!(registry.subscriber_count(&room_id).await, 1);

    drop(rx);

    let delivered = registry
        .broadcast(
            &room_id,
            RoomEvent {
                origin: Uuid::new_v4(),
                event: ServerEvent::TypingStop {
                    conversation_id: room_id.clone(),
                    user_id: alice.id,
                },
            },
        )
        .await;
    assert_eq!(delivered, 0);
}
