//! Integration tests for push connections, presence and live delivery.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use murmur_server::{api, db, AppState, ServerConfig};
use murmur_shared::constants::{CLOSE_INVALID_IDENTITY, CLOSE_SUPERSEDED};
use murmur_shared::{ClientEvent, Profile, PushEvent, UserId};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start the server on a random port with a fresh database.
async fn start_test_server() -> SocketAddr {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = db::open(&tmp_dir.path().join("murmur.db")).expect("Failed to open store");

    let app = api::build_router(AppState::new(store, ServerConfig::default()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    addr
}

async fn signup(addr: SocketAddr, id: &str) -> Profile {
    let resp = reqwest::Client::new()
        .put(format!("http://{addr}/api/auth/profile"))
        .header("x-user-id", id)
        .json(&json!({ "fullName": format!("User {id}"), "bio": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "Signup failed for {id}");
    let body: serde_json::Value = resp.json().await.unwrap();
    serde_json::from_value(body["user"].clone()).unwrap()
}

async fn connect(addr: SocketAddr, id: &str) -> WsStream {
    let url = format!("ws://{addr}/ws?userId={id}");
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .expect("WebSocket connect failed");
    ws
}

/// Next push event, skipping control frames. `None` on timeout or close.
async fn next_event(ws: &mut WsStream, wait: Duration) -> Option<PushEvent> {
    loop {
        match tokio::time::timeout(wait, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(PushEvent::from_json(&text).expect("Malformed push event"));
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

/// Read until a presence set equal to `expected` arrives.
async fn wait_for_presence(ws: &mut WsStream, expected: &[&str]) {
    let expected: Vec<UserId> = expected.iter().map(|s| UserId::from(*s)).collect();
    loop {
        match next_event(ws, Duration::from_secs(2)).await {
            Some(PushEvent::PresenceSet(ids)) if ids == expected => return,
            Some(_) => continue,
            None => panic!("Presence {expected:?} never arrived"),
        }
    }
}

/// Read until the connection is closed and return the close code.
async fn wait_for_close(ws: &mut WsStream) -> Option<u16> {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => return frame.map(|f| u16::from(f.code)),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

#[tokio::test]
async fn test_invalid_handshake_is_closed() {
    let addr = start_test_server().await;

    for url in [
        format!("ws://{addr}/ws"),
        format!("ws://{addr}/ws?userId="),
        format!("ws://{addr}/ws?userId=undefined"),
    ] {
        let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        assert_eq!(wait_for_close(&mut ws).await, Some(CLOSE_INVALID_IDENTITY), "{url}");
    }

    let info: serde_json::Value = reqwest::get(format!("http://{addr}/info"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["online"], 0);
}

#[tokio::test]
async fn test_presence_follows_connects_and_disconnects() {
    let addr = start_test_server().await;

    let mut alice = connect(addr, "alice").await;
    wait_for_presence(&mut alice, &["alice"]).await;

    let mut bob = connect(addr, "bob").await;
    wait_for_presence(&mut bob, &["alice", "bob"]).await;
    wait_for_presence(&mut alice, &["alice", "bob"]).await;

    bob.close(None).await.unwrap();
    wait_for_presence(&mut alice, &["alice"]).await;
}

#[tokio::test]
async fn test_live_push_then_mark_seen() {
    let addr = start_test_server().await;
    signup(addr, "alice").await;
    signup(addr, "bob").await;

    let mut bob = connect(addr, "bob").await;
    wait_for_presence(&mut bob, &["bob"]).await;

    let http = reqwest::Client::new();
    let resp = http
        .post(format!("http://{addr}/api/messages/send/bob"))
        .header("x-user-id", "alice")
        .json(&json!({ "text": "hey bob" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let sent_id = body["newMessage"]["id"].as_str().unwrap().to_string();

    let pushed = match next_event(&mut bob, Duration::from_secs(2)).await {
        Some(PushEvent::MessageCreated(msg)) => msg,
        other => panic!("Expected message-created, got {other:?}"),
    };
    assert_eq!(pushed.id.to_string(), sent_id);
    assert_eq!(pushed.text.as_deref(), Some("hey bob"));
    assert!(!pushed.seen);

    // Bob has the conversation open, so the client marks it right away
    let resp = http
        .put(format!("http://{addr}/api/messages/mark/{sent_id}"))
        .header("x-user-id", "bob")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["message"]["seen"], true);

    let users: serde_json::Value = http
        .get(format!("http://{addr}/api/messages/users"))
        .header("x-user-id", "bob")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(users["unseenMessages"], json!({}));
}

#[tokio::test]
async fn test_offline_receiver_sees_message_on_fetch() {
    let addr = start_test_server().await;
    signup(addr, "alice").await;
    signup(addr, "bob").await;

    let http = reqwest::Client::new();
    for text in ["one", "two"] {
        let resp = http
            .post(format!("http://{addr}/api/messages/send/bob"))
            .header("x-user-id", "alice")
            .json(&json!({ "text": text }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let users: serde_json::Value = http
        .get(format!("http://{addr}/api/messages/users"))
        .header("x-user-id", "bob")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(users["unseenMessages"]["alice"], 2);

    let history: serde_json::Value = http
        .get(format!("http://{addr}/api/messages/alice"))
        .header("x-user-id", "bob")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = history["messages"].as_array().unwrap();
    let texts: Vec<&str> = messages.iter().map(|m| m["text"].as_str().unwrap()).collect();
    assert_eq!(texts, vec!["one", "two"]);
    assert!(messages.iter().all(|m| m["seen"] == true));
}

#[tokio::test]
async fn test_reconnect_supersedes_old_connection() {
    let addr = start_test_server().await;
    signup(addr, "alice").await;
    signup(addr, "bob").await;

    let mut first = connect(addr, "bob").await;
    wait_for_presence(&mut first, &["bob"]).await;

    let mut second = connect(addr, "bob").await;
    assert_eq!(wait_for_close(&mut first).await, Some(CLOSE_SUPERSEDED));
    wait_for_presence(&mut second, &["bob"]).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/messages/send/bob"))
        .header("x-user-id", "alice")
        .json(&json!({ "text": "which one?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    match next_event(&mut second, Duration::from_secs(2)).await {
        Some(PushEvent::MessageCreated(msg)) => assert_eq!(msg.text.as_deref(), Some("which one?")),
        other => panic!("Expected message-created on the new connection, got {other:?}"),
    }

    // The stale connection going away must not take bob offline
    drop(first);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let info: serde_json::Value = reqwest::get(format!("http://{addr}/info"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["online"], 1);
}

#[tokio::test]
async fn test_profile_events_relay_to_others_only() {
    let addr = start_test_server().await;

    let mut alice = connect(addr, "alice").await;
    wait_for_presence(&mut alice, &["alice"]).await;
    let mut bob = connect(addr, "bob").await;
    wait_for_presence(&mut bob, &["alice", "bob"]).await;
    wait_for_presence(&mut alice, &["alice", "bob"]).await;

    let profile = signup(addr, "alice").await;
    let event = ClientEvent::PeerUpdated(profile.clone());
    alice
        .send(Message::Text(event.to_json().unwrap()))
        .await
        .unwrap();

    match next_event(&mut bob, Duration::from_secs(2)).await {
        Some(PushEvent::PeerUpdated(p)) => assert_eq!(p, profile),
        other => panic!("Expected peer-updated, got {other:?}"),
    }
    assert_eq!(next_event(&mut alice, Duration::from_millis(200)).await, None);
}

#[tokio::test]
async fn test_control_and_binary_frames_keep_session() {
    let addr = start_test_server().await;

    let mut alice = connect(addr, "alice").await;
    wait_for_presence(&mut alice, &["alice"]).await;
    let mut bob = connect(addr, "bob").await;
    wait_for_presence(&mut bob, &["alice", "bob"]).await;
    wait_for_presence(&mut alice, &["alice", "bob"]).await;

    alice.send(Message::Ping(b"hi".to_vec())).await.unwrap();
    alice.send(Message::Pong(Vec::new())).await.unwrap();
    alice.send(Message::Binary(vec![1, 2, 3])).await.unwrap();

    // Still registered: a relayed event reaches bob and nobody went offline
    let profile = signup(addr, "alice").await;
    let event = ClientEvent::PeerCreated(profile.clone());
    alice
        .send(Message::Text(event.to_json().unwrap()))
        .await
        .unwrap();

    match next_event(&mut bob, Duration::from_secs(2)).await {
        Some(PushEvent::PeerCreated(p)) => assert_eq!(p, profile),
        other => panic!("Expected peer-created, got {other:?}"),
    }
    assert_eq!(next_event(&mut alice, Duration::from_millis(200)).await, None);
}
