mod common;

use common::TestApp;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_never_seen_user_returns_null() {
    let app = TestApp::spawn().await;
    let viewer = app.token_for(Uuid::new_v4());

    let resp = app
        .client
        .get(format!("{}/v1/presence/{}", app.server_url, Uuid::new_v4()))
        .bearer_auth(&viewer)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body.is_null(), "never-seen user must be null, got {body}");
}

#[tokio::test]
async fn test_explicit_status_roundtrip() {
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let token = app.token_for(user);
    let conversation_id = Uuid::new_v4();

    let resp = app
        .client
        .put(format!("{}/v1/presence", app.server_url))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "status": "away", "active_conversation_id": conversation_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = app
        .client
        .get(format!("{}/v1/presence/{user}", app.server_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "away");
    assert_eq!(body["user_id"], user.to_string());
    assert_eq!(body["active_conversation_id"], conversation_id.to_string());
    assert!(body["last_seen_at"].is_string());
}

#[tokio::test]
async fn test_presence_changes_reach_the_broadcast_channel() {
    let app = TestApp::spawn().await;
    let (watcher, subject) = (Uuid::new_v4(), Uuid::new_v4());

    let mut watcher_ws = app.connect_ws(&app.token_for(watcher)).await;

    app.client
        .put(format!("{}/v1/presence", app.server_url))
        .bearer_auth(app.token_for(subject))
        .json(&serde_json::json!({ "status": "online" }))
        .send()
        .await
        .unwrap();

    // The watcher sees the subject come online without sharing any
    // conversation: presence rides a broadcast channel.
    loop {
        let event = watcher_ws.expect_frame("presence.changed").await;
        if event["presence"]["user_id"] == subject.to_string() {
            assert_eq!(event["presence"]["status"], "online");
            break;
        }
    }

    watcher_ws.close().await;
}

#[tokio::test]
async fn test_silence_decays_presence() {
    let mut config = common::get_test_config();
    config.presence.away_after_ms = 150;
    config.presence.offline_after_ms = 400;
    config.presence.sweep_interval_ms = 40;

    let app = TestApp::spawn_with_config(config).await;
    let user = Uuid::new_v4();
    let token = app.token_for(user);

    app.client
        .put(format!("{}/v1/presence", app.server_url))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "status": "online" }))
        .send()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    let body: serde_json::Value = app
        .client
        .get(format!("{}/v1/presence/{user}", app.server_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "away", "online should decay to away after the heartbeat window");

    tokio::time::sleep(Duration::from_millis(400)).await;
    let body: serde_json::Value = app
        .client
        .get(format!("{}/v1/presence/{user}", app.server_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "offline", "away should decay to offline after the silence window");
}

#[tokio::test]
async fn test_heartbeat_frames_keep_user_online() {
    let mut config = common::get_test_config();
    config.presence.away_after_ms = 200;
    config.presence.offline_after_ms = 2_000;
    config.presence.sweep_interval_ms = 40;

    let app = TestApp::spawn_with_config(config).await;
    let user = Uuid::new_v4();
    let token = app.token_for(user);

    let mut ws = app.connect_ws(&token).await;

    // Keep heartbeating past the away window.
    for _ in 0..5 {
        ws.send_json(serde_json::json!({ "type": "heartbeat" })).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let body: serde_json::Value = app
        .client
        .get(format!("{}/v1/presence/{user}", app.server_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "online", "heartbeats must hold off the away decay");

    ws.close().await;
}
