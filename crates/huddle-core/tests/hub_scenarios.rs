//! End-to-end scenarios driven through the hub, with unbounded channels
//! standing in for client sockets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use huddle_core::auth::VerifyError;
use huddle_core::{
    CredentialVerifier, Hub, Identity, MemoryMessageStore, OpenOracle,
};
use huddle_protocol::{ClientEvent, Destination, ErrorCode, PresenceStatus, ServerEvent};
use tokio::sync::mpsc;

struct PrefixVerifier;

#[async_trait]
impl CredentialVerifier for PrefixVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        match token.strip_prefix("user:") {
            Some(id) => Ok(Identity::new(id, id.to_uppercase())),
            None => Err(VerifyError::Invalid),
        }
    }
}

fn hub() -> Hub {
    Hub::new(
        Arc::new(PrefixVerifier),
        Arc::new(MemoryMessageStore::new()),
        Arc::new(OpenOracle),
        Duration::from_secs(6),
    )
}

fn connect(hub: &Hub, id: &str, conn: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
    connect_with_contacts(hub, id, conn, Vec::new())
}

fn connect_with_contacts(
    hub: &Hub,
    id: &str,
    conn: &str,
    contacts: Vec<String>,
) -> mpsc::UnboundedReceiver<ServerEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    hub.connect(
        conn,
        &Identity::new(id, id.to_uppercase()).with_contacts(contacts),
        tx,
    );
    rx
}

async fn join(hub: &Hub, conn: &str, room: &str) {
    hub.handle_event(
        conn,
        ClientEvent::JoinRoom {
            id: 1,
            room: room.to_string(),
        },
    )
    .await;
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn handshake_resolves_identity_or_rejects() {
    let hub = hub();

    let identity = hub.authenticate(Some("user:alice")).await.unwrap();
    assert_eq!(identity.id, "alice");
    assert_eq!(identity.display_name, "ALICE");

    assert!(hub.authenticate(Some("garbage")).await.is_err());
    assert!(hub.authenticate(None).await.is_err());
}

#[tokio::test]
async fn room_message_reaches_peer_and_acks_sender() {
    let hub = hub();
    let mut u1_rx = connect(&hub, "u1", "c1");
    let mut u2_rx = connect(&hub, "u2", "c2");
    join(&hub, "c1", "g1").await;
    join(&hub, "c2", "g1").await;
    drain(&mut u1_rx);
    drain(&mut u2_rx);

    hub.handle_event(
        "c1",
        ClientEvent::SendMessage {
            id: 7,
            destination: Destination::room("g1"),
            content: "hello".to_string(),
            reply_to: None,
            attachments: Vec::new(),
        },
    )
    .await;

    let delivered_id = match u2_rx.try_recv() {
        Ok(ServerEvent::MessageCreated { message }) => {
            assert_eq!(message.room, "g1");
            assert_eq!(message.content, "hello");
            assert_eq!(message.author, "u1");
            message.id
        }
        other => panic!("Expected MessageCreated, got {:?}", other),
    };

    match u1_rx.try_recv() {
        Ok(ServerEvent::MessageAck {
            id,
            message,
            timestamp,
        }) => {
            assert_eq!(id, 7);
            assert_eq!(message, delivered_id);
            assert!(timestamp > 0);
        }
        other => panic!("Expected MessageAck, got {:?}", other),
    }

    // Exactly one fan-out and one ack: both channels are drained.
    assert!(u1_rx.try_recv().is_err());
    assert!(u2_rx.try_recv().is_err());
}

#[tokio::test]
async fn fanout_count_matches_other_members() {
    let hub = hub();
    let mut receivers = Vec::new();
    for i in 1..=4 {
        let conn = format!("c{i}");
        let mut rx = connect(&hub, &format!("u{i}"), &conn);
        join(&hub, &conn, "g1").await;
        drain(&mut rx);
        receivers.push(rx);
    }

    hub.handle_event(
        "c1",
        ClientEvent::SendMessage {
            id: 1,
            destination: Destination::room("g1"),
            content: "fan out".to_string(),
            reply_to: None,
            attachments: Vec::new(),
        },
    )
    .await;

    // Sender gets exactly the ack.
    let sender_events = drain(&mut receivers[0]);
    assert_eq!(sender_events.len(), 1);
    assert!(matches!(sender_events[0], ServerEvent::MessageAck { .. }));

    // Each of the three other members gets exactly one copy.
    for rx in receivers.iter_mut().skip(1) {
        let events = drain(rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::MessageCreated { .. }));
    }
}

#[tokio::test]
async fn direct_message_derives_same_room_both_ways() {
    let hub = hub();
    let mut u1_rx = connect(&hub, "u1", "c1");
    let mut u2_rx = connect(&hub, "u2", "c2");

    hub.handle_event(
        "c1",
        ClientEvent::SendMessage {
            id: 1,
            destination: Destination::direct("u2"),
            content: "ping".to_string(),
            reply_to: None,
            attachments: Vec::new(),
        },
    )
    .await;
    hub.handle_event(
        "c2",
        ClientEvent::SendMessage {
            id: 2,
            destination: Destination::direct("u1"),
            content: "pong".to_string(),
            reply_to: None,
            attachments: Vec::new(),
        },
    )
    .await;

    let first_room = match u2_rx.try_recv() {
        Ok(ServerEvent::MessageCreated { message }) => message.room,
        other => panic!("Expected MessageCreated, got {:?}", other),
    };
    drain(&mut u2_rx);

    let events = drain(&mut u1_rx);
    let second_room = events
        .iter()
        .find_map(|e| match e {
            ServerEvent::MessageCreated { message } => Some(message.room.clone()),
            _ => None,
        })
        .expect("reply not delivered");

    assert_eq!(first_room, second_room);
}

#[tokio::test]
async fn call_to_offline_target_creates_no_session() {
    let hub = hub();
    let mut u1_rx = connect(&hub, "u1", "c1");

    hub.handle_event(
        "c1",
        ClientEvent::InitiateCall {
            id: 5,
            target: "u3".to_string(),
            kind: huddle_protocol::CallKind::Video,
        },
    )
    .await;

    match u1_rx.try_recv() {
        Ok(ServerEvent::Error { id, code, .. }) => {
            assert_eq!(id, 5);
            assert_eq!(code, ErrorCode::DestinationUnavailable);
        }
        other => panic!("Expected Error, got {:?}", other),
    }
    assert_eq!(hub.stats().calls, 0);
}

#[tokio::test]
async fn call_lifecycle_with_signaling() {
    let hub = hub();
    let mut u1_rx = connect(&hub, "u1", "c1");
    let mut u2_rx = connect(&hub, "u2", "c2");

    hub.handle_event(
        "c1",
        ClientEvent::InitiateCall {
            id: 1,
            target: "u2".to_string(),
            kind: huddle_protocol::CallKind::Voice,
        },
    )
    .await;

    let call_id = match u1_rx.try_recv() {
        Ok(ServerEvent::CallAck { call, .. }) => call,
        other => panic!("Expected CallAck, got {:?}", other),
    };
    assert!(matches!(
        u2_rx.try_recv(),
        Ok(ServerEvent::IncomingCall { .. })
    ));

    hub.handle_event(
        "c2",
        ClientEvent::AcceptCall {
            id: 2,
            call: call_id.clone(),
        },
    )
    .await;
    assert!(matches!(
        u1_rx.try_recv(),
        Ok(ServerEvent::CallAccepted { .. })
    ));
    drain(&mut u2_rx);

    hub.handle_event(
        "c1",
        ClientEvent::RelaySignal {
            call: call_id.clone(),
            target: "u2".to_string(),
            kind: huddle_protocol::SignalKind::Offer,
            payload: serde_json::json!({"sdp": "v=0"}),
        },
    )
    .await;
    assert!(matches!(
        u2_rx.try_recv(),
        Ok(ServerEvent::SignalOffer { .. })
    ));

    hub.handle_event(
        "c2",
        ClientEvent::EndCall {
            id: 3,
            call: call_id,
        },
    )
    .await;
    assert!(matches!(u1_rx.try_recv(), Ok(ServerEvent::CallEnded { .. })));
    assert_eq!(hub.stats().calls, 0);
}

#[tokio::test]
async fn typing_expires_by_sweep_alone() {
    let hub = hub();
    let _u1_rx = connect(&hub, "u1", "c1");
    let mut u2_rx = connect(&hub, "u2", "c2");
    join(&hub, "c1", "g1").await;
    join(&hub, "c2", "g1").await;
    drain(&mut u2_rx);

    hub.handle_event(
        "c1",
        ClientEvent::Typing {
            room: "g1".to_string(),
            is_typing: true,
        },
    )
    .await;
    assert!(matches!(u2_rx.try_recv(), Ok(ServerEvent::UserTyping { .. })));

    // No stop, no message: the sweep alone produces the stopped event.
    let expired = hub.sweep_typing(Instant::now() + Duration::from_secs(7));
    assert_eq!(expired, 1);
    assert!(matches!(
        u2_rx.try_recv(),
        Ok(ServerEvent::UserStoppedTyping { .. })
    ));
}

#[tokio::test]
async fn sole_disconnect_broadcasts_offline_once_and_prunes_rooms() {
    let hub = hub();
    let _u1_rx = connect_with_contacts(&hub, "u1", "c1", vec!["u2".to_string()]);
    let mut u2_rx = connect(&hub, "u2", "c2");
    join(&hub, "c1", "g1").await;
    join(&hub, "c2", "g1").await;
    drain(&mut u2_rx);

    hub.disconnect("c1");

    let events = drain(&mut u2_rx);
    let offline_count = events
        .iter()
        .filter(|e| matches!(e, ServerEvent::UserOffline { identity, .. } if identity == "u1"))
        .count();
    assert_eq!(offline_count, 1);

    // Room pruned down to the surviving member.
    let stats = hub.stats();
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.rooms, 1);
}

#[tokio::test]
async fn multi_device_presence_collapses() {
    let hub = hub();
    let mut watcher_rx = connect(&hub, "bob", "c-bob");

    let _phone = connect_with_contacts(&hub, "alice", "c-phone", vec!["bob".to_string()]);
    assert!(matches!(
        watcher_rx.try_recv(),
        Ok(ServerEvent::UserOnline { .. })
    ));

    // Second device: no second online broadcast.
    let _desk = connect_with_contacts(&hub, "alice", "c-desk", vec!["bob".to_string()]);
    assert!(watcher_rx.try_recv().is_err());

    // First device drops: still online.
    hub.disconnect("c-phone");
    assert!(watcher_rx.try_recv().is_err());

    // Last device drops: exactly one offline broadcast.
    hub.disconnect("c-desk");
    assert!(matches!(
        watcher_rx.try_recv(),
        Ok(ServerEvent::UserOffline { .. })
    ));
    assert!(watcher_rx.try_recv().is_err());
}

#[tokio::test]
async fn status_change_reaches_room_co_members() {
    let hub = hub();
    let _u1_rx = connect(&hub, "u1", "c1");
    let mut u2_rx = connect(&hub, "u2", "c2");
    join(&hub, "c1", "g1").await;
    join(&hub, "c2", "g1").await;
    drain(&mut u2_rx);

    hub.handle_event(
        "c1",
        ClientEvent::SetStatus {
            id: 4,
            status: PresenceStatus::Away,
            custom_message: None,
        },
    )
    .await;

    let events = drain(&mut u2_rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::UserStatusChanged {
            identity,
            status: PresenceStatus::Away,
            ..
        } if identity == "u1"
    )));
}

#[tokio::test]
async fn disconnect_mid_call_notifies_peer() {
    let hub = hub();
    let mut u1_rx = connect(&hub, "u1", "c1");
    let mut u2_rx = connect(&hub, "u2", "c2");

    hub.handle_event(
        "c1",
        ClientEvent::InitiateCall {
            id: 1,
            target: "u2".to_string(),
            kind: huddle_protocol::CallKind::Video,
        },
    )
    .await;
    drain(&mut u1_rx);
    drain(&mut u2_rx);

    hub.disconnect("c1");

    let events = drain(&mut u2_rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::CallEnded { identity: None, .. })));
    assert_eq!(hub.stats().calls, 0);
}
