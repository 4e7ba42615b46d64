mod common;

use common::TestApp;
use futures::SinkExt;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

#[tokio::test]
async fn test_websocket_rejects_invalid_token() {
    let app = TestApp::spawn().await;
    let res = tokio_tungstenite::connect_async(format!("{}?token=invalid", app.ws_url)).await;
    assert!(res.is_err());
}

#[tokio::test]
async fn test_subscribed_session_receives_message_events() {
    let app = TestApp::spawn().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);
    let bob_token = app.token_for(bob);

    let conversation = app.create_direct(&alice_token, bob).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let mut bob_ws = app.connect_ws(&bob_token).await;
    bob_ws.subscribe(conversation_id, false).await;

    app.send_message(&alice_token, conversation_id, "ping").await;

    let event = bob_ws.expect_frame("message.new").await;
    assert_eq!(event["conversation_id"], conversation_id);
    assert_eq!(event["message"]["content"], "ping");
    assert_eq!(event["message"]["sender_id"], alice.to_string());
    bob_ws.close().await;
}

#[tokio::test]
async fn test_subscribe_requires_participation() {
    let app = TestApp::spawn().await;
    let (alice, bob, outsider) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);

    let conversation = app.create_direct(&alice_token, bob).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let mut ws = app.connect_ws(&app.token_for(outsider)).await;
    ws.send_json(serde_json::json!({
        "type": "subscribe",
        "conversation_id": conversation_id,
    }))
    .await;

    let frame = ws.expect_frame("error").await;
    assert!(frame["message"].as_str().unwrap().contains("participant"));
    ws.close().await;
}

#[tokio::test]
async fn test_echo_suppression_skips_own_events() {
    let app = TestApp::spawn().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);
    let bob_token = app.token_for(bob);

    let conversation = app.create_direct(&alice_token, bob).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let mut alice_ws = app.connect_ws(&alice_token).await;
    alice_ws.subscribe(conversation_id, true).await;

    let mut bob_ws = app.connect_ws(&bob_token).await;
    bob_ws.subscribe(conversation_id, false).await;

    app.send_message(&alice_token, conversation_id, "my own words").await;

    // Bob sees it; the writer does not hear the echo.
    let event = bob_ws.expect_frame("message.new").await;
    assert_eq!(event["message"]["content"], "my own words");
    alice_ws.expect_no_frame("message.new", Duration::from_millis(300)).await;

    // Bob's reply still reaches Alice: suppression is writer-only.
    app.send_message(&bob_token, conversation_id, "reply").await;
    let event = alice_ws.expect_frame("message.new").await;
    assert_eq!(event["message"]["content"], "reply");

    alice_ws.close().await;
    bob_ws.close().await;
}

#[tokio::test]
async fn test_typing_roundtrip_with_expiry() {
    let app = TestApp::spawn().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);
    let bob_token = app.token_for(bob);

    let conversation = app.create_direct(&alice_token, bob).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let mut alice_ws = app.connect_ws(&alice_token).await;
    alice_ws.subscribe(conversation_id, false).await;

    let mut bob_ws = app.connect_ws(&bob_token).await;
    bob_ws.subscribe(conversation_id, false).await;

    // Repeated typing frames refresh the entry without duplicate events.
    for _ in 0..3 {
        bob_ws.send_json(serde_json::json!({ "type": "typing", "conversation_id": conversation_id })).await;
    }

    let event = alice_ws.expect_frame("typing.changed").await;
    assert_eq!(event["typing"], true);
    assert_eq!(event["user_id"], bob.to_string());

    // No further activity: the expiry sweep emits exactly one stop.
    let event = alice_ws.expect_frame("typing.changed").await;
    assert_eq!(event["typing"], false);
    assert_eq!(event["user_id"], bob.to_string());

    alice_ws.expect_no_frame("typing.changed", Duration::from_millis(400)).await;

    alice_ws.close().await;
    bob_ws.close().await;
}

#[tokio::test]
async fn test_session_teardown_clears_typing() {
    let app = TestApp::spawn().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);
    let bob_token = app.token_for(bob);

    let conversation = app.create_direct(&alice_token, bob).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let mut alice_ws = app.connect_ws(&alice_token).await;
    alice_ws.subscribe(conversation_id, false).await;

    let mut bob_ws = app.connect_ws(&bob_token).await;
    bob_ws.subscribe(conversation_id, false).await;
    bob_ws.send_json(serde_json::json!({ "type": "typing", "conversation_id": conversation_id })).await;

    let event = alice_ws.expect_frame("typing.changed").await;
    assert_eq!(event["typing"], true);

    // Bob disconnects mid-typing; the indicator must not linger.
    bob_ws.close().await;

    let event = alice_ws.expect_frame("typing.changed").await;
    assert_eq!(event["typing"], false);

    alice_ws.close().await;
}

#[tokio::test]
async fn test_malformed_frame_does_not_kill_session() {
    let app = TestApp::spawn().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);
    let bob_token = app.token_for(bob);

    let conversation = app.create_direct(&alice_token, bob).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let mut bob_ws = app.connect_ws(&bob_token).await;
    bob_ws.subscribe(conversation_id, false).await;

    // Garbage, then an unknown type: both logged and dropped.
    bob_ws.stream.send(WsMessage::Text("this is not json".into())).await.unwrap();
    bob_ws.send_json(serde_json::json!({ "type": "warp_core_breach" })).await;

    // The session is still delivering events afterwards.
    app.send_message(&alice_token, conversation_id, "still alive?").await;
    let event = bob_ws.expect_frame("message.new").await;
    assert_eq!(event["message"]["content"], "still alive?");
    bob_ws.close().await;
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let app = TestApp::spawn().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);
    let bob_token = app.token_for(bob);

    let conversation = app.create_direct(&alice_token, bob).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let mut bob_ws = app.connect_ws(&bob_token).await;
    bob_ws.subscribe(conversation_id, false).await;

    bob_ws.send_json(serde_json::json!({ "type": "unsubscribe", "conversation_id": conversation_id })).await;
    bob_ws.expect_frame("unsubscribed").await;

    app.send_message(&alice_token, conversation_id, "into the void").await;
    bob_ws.expect_no_frame("message.new", Duration::from_millis(300)).await;
    bob_ws.close().await;
}
