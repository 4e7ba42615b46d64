mod common;

use common::TestApp;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_list_order_matches_published_event_order() {
    let app = TestApp::spawn().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);
    let bob_token = app.token_for(bob);

    let conversation = app.create_direct(&alice_token, bob).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let mut bob_ws = app.connect_ws(&bob_token).await;
    bob_ws.subscribe(conversation_id, false).await;

    let count = 8;
    for i in 0..count {
        app.send_message(&alice_token, conversation_id, &format!("message {i}")).await;
    }

    let mut event_ids = Vec::new();
    for _ in 0..count {
        let event = bob_ws.expect_frame("message.new").await;
        event_ids.push(event["message"]["id"].as_str().unwrap().to_string());
    }

    // The list pages newest-first; reversed it must equal the event order.
    let page = app.list_messages(&bob_token, conversation_id, None).await;
    let mut listed_ids: Vec<String> = page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect();
    listed_ids.reverse();

    assert_eq!(listed_ids, event_ids);
    bob_ws.close().await;
}

#[tokio::test]
async fn test_send_requires_participation() {
    let app = TestApp::spawn().await;
    let (alice, bob, outsider) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);

    let conversation = app.create_direct(&alice_token, bob).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let resp = app
        .client
        .post(format!("{}/v1/conversations/{conversation_id}/messages", app.server_url))
        .bearer_auth(app.token_for(outsider))
        .json(&serde_json::json!({ "content": "let me in" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn test_edit_is_sender_only() {
    let app = TestApp::spawn().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);

    let conversation = app.create_direct(&alice_token, bob).await;
    let message = app.send_message(&alice_token, conversation["id"].as_str().unwrap(), "original").await;
    let message_id = message["id"].as_str().unwrap();

    let resp = app
        .client
        .patch(format!("{}/v1/messages/{message_id}", app.server_url))
        .bearer_auth(app.token_for(bob))
        .json(&serde_json::json!({ "content": "hijacked" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = app
        .client
        .patch(format!("{}/v1/messages/{message_id}", app.server_url))
        .bearer_auth(&alice_token)
        .json(&serde_json::json!({ "content": "revised" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let edited: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(edited["content"], "revised");
    assert!(edited["edited_at"].is_string());
    assert_eq!(edited["created_at"], message["created_at"]);
}

#[tokio::test]
async fn test_delete_tombstones_and_blocks_edit() {
    let app = TestApp::spawn().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);

    let conversation = app.create_direct(&alice_token, bob).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let first = app.send_message(&alice_token, conversation_id, "first").await;
    let second = app.send_message(&alice_token, conversation_id, "second").await;
    let first_id = first["id"].as_str().unwrap();

    let resp = app
        .client
        .delete(format!("{}/v1/messages/{first_id}", app.server_url))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    // The tombstone keeps its id and position; only the content is gone.
    let page = app.list_messages(&alice_token, conversation_id, None).await;
    let messages = page["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["id"], first["id"]);
    assert_eq!(messages[1]["content"], "");
    assert!(messages[1]["deleted_at"].is_string());
    assert_eq!(messages[1]["seq"], first["seq"]);
    assert_eq!(messages[0]["id"], second["id"]);

    // Editing a tombstone is a conflict.
    let resp = app
        .client
        .patch(format!("{}/v1/messages/{first_id}", app.server_url))
        .bearer_auth(&alice_token)
        .json(&serde_json::json!({ "content": "resurrect" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    // Deleting again is a harmless no-op.
    let resp = app
        .client
        .delete(format!("{}/v1/messages/{first_id}", app.server_url))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn test_reactions_are_idempotent() {
    let app = TestApp::spawn().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);
    let bob_token = app.token_for(bob);

    let conversation = app.create_direct(&alice_token, bob).await;
    let conversation_id = conversation["id"].as_str().unwrap();
    let message = app.send_message(&alice_token, conversation_id, "react to me").await;
    let message_id = message["id"].as_str().unwrap();

    for _ in 0..2 {
        let resp = app
            .client
            .put(format!("{}/v1/messages/{message_id}/reactions", app.server_url))
            .bearer_auth(&bob_token)
            .json(&serde_json::json!({ "kind": "like" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);
    }

    let page = app.list_messages(&bob_token, conversation_id, None).await;
    let reactions = page["messages"][0]["reactions"].as_array().unwrap().clone();
    assert_eq!(reactions.len(), 1, "duplicate reaction was stored");
    assert_eq!(reactions[0]["kind"], "like");

    // Removing twice: second removal is a no-op, not an error.
    for _ in 0..2 {
        let resp = app
            .client
            .delete(format!("{}/v1/messages/{message_id}/reactions", app.server_url))
            .bearer_auth(&bob_token)
            .json(&serde_json::json!({ "kind": "like" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);
    }

    let page = app.list_messages(&bob_token, conversation_id, None).await;
    assert!(page["messages"][0]["reactions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_reaction_events_fire_only_on_change() {
    let app = TestApp::spawn().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);
    let bob_token = app.token_for(bob);

    let conversation = app.create_direct(&alice_token, bob).await;
    let conversation_id = conversation["id"].as_str().unwrap();
    let message = app.send_message(&alice_token, conversation_id, "hello").await;
    let message_id = message["id"].as_str().unwrap();

    let mut alice_ws = app.connect_ws(&alice_token).await;
    alice_ws.subscribe(conversation_id, false).await;

    for _ in 0..3 {
        app.client
            .put(format!("{}/v1/messages/{message_id}/reactions", app.server_url))
            .bearer_auth(&bob_token)
            .json(&serde_json::json!({ "kind": "love" }))
            .send()
            .await
            .unwrap();
    }

    let event = alice_ws.expect_frame("reaction.changed").await;
    assert_eq!(event["added"], true);
    assert_eq!(event["kind"], "love");

    // The two duplicate adds must not have produced further events.
    alice_ws.expect_no_frame("reaction.changed", Duration::from_millis(300)).await;
    alice_ws.close().await;
}

#[tokio::test]
async fn test_pagination_is_stable_under_concurrent_inserts() {
    let app = TestApp::spawn().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);

    let conversation = app.create_direct(&alice_token, bob).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    for i in 0..25 {
        app.send_message(&alice_token, conversation_id, &format!("msg {i}")).await;
    }

    let first: serde_json::Value = app
        .client
        .get(format!("{}/v1/conversations/{conversation_id}/messages?limit=10", app.server_url))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(first["has_more"], true);
    let first_seqs: Vec<i64> =
        first["messages"].as_array().unwrap().iter().map(|m| m["seq"].as_i64().unwrap()).collect();
    assert_eq!(first_seqs, (16..=25).rev().collect::<Vec<i64>>());

    // New messages arrive while the client is mid-pagination.
    for i in 0..5 {
        app.send_message(&alice_token, conversation_id, &format!("late {i}")).await;
    }

    let cursor = first["next_cursor"].as_str().unwrap();
    let second: serde_json::Value = app
        .client
        .get(format!(
            "{}/v1/conversations/{conversation_id}/messages?limit=10&cursor={cursor}",
            app.server_url
        ))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // No duplicates, no skips: the page continues exactly below the cursor.
    let second_seqs: Vec<i64> =
        second["messages"].as_array().unwrap().iter().map(|m| m["seq"].as_i64().unwrap()).collect();
    assert_eq!(second_seqs, (6..=15).rev().collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_search_is_scoped_to_participants() {
    let app = TestApp::spawn().await;
    let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);

    let conversation = app.create_direct(&alice_token, bob).await;
    app.send_message(&alice_token, conversation["id"].as_str().unwrap(), "the invoice is overdue").await;

    let hits: serde_json::Value = app
        .client
        .get(format!("{}/v1/messages/search?q=invoice", app.server_url))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(hits["messages"].as_array().unwrap().len(), 1);

    // Carol is in no conversation containing the match: zero results.
    let hits: serde_json::Value = app
        .client
        .get(format!("{}/v1/messages/search?q=invoice", app.server_url))
        .bearer_auth(app.token_for(carol))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(hits["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_search_excludes_tombstones() {
    let app = TestApp::spawn().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);

    let conversation = app.create_direct(&alice_token, bob).await;
    let message = app.send_message(&alice_token, conversation["id"].as_str().unwrap(), "secret invoice").await;

    app.client
        .delete(format!("{}/v1/messages/{}", app.server_url, message["id"].as_str().unwrap()))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();

    let hits: serde_json::Value = app
        .client
        .get(format!("{}/v1/messages/search?q=invoice", app.server_url))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(hits["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_report_message_requires_participation() {
    let app = TestApp::spawn().await;
    let (alice, bob, outsider) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);

    let conversation = app.create_direct(&alice_token, bob).await;
    let message = app.send_message(&alice_token, conversation["id"].as_str().unwrap(), "rude").await;
    let message_id = message["id"].as_str().unwrap();

    let resp = app
        .client
        .post(format!("{}/v1/messages/{message_id}/report", app.server_url))
        .bearer_auth(app.token_for(outsider))
        .json(&serde_json::json!({ "reason": "harassment" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = app
        .client
        .post(format!("{}/v1/messages/{message_id}/report", app.server_url))
        .bearer_auth(app.token_for(bob))
        .json(&serde_json::json!({ "reason": "harassment", "description": "uncalled for" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
}

#[tokio::test]
async fn test_reply_must_target_same_conversation() {
    let app = TestApp::spawn().await;
    let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let alice_token = app.token_for(alice);

    let with_bob = app.create_direct(&alice_token, bob).await;
    let with_carol = app.create_direct(&alice_token, carol).await;
    let foreign = app.send_message(&alice_token, with_carol["id"].as_str().unwrap(), "elsewhere").await;

    let resp = app
        .client
        .post(format!("{}/v1/conversations/{}/messages", app.server_url, with_bob["id"].as_str().unwrap()))
        .bearer_auth(&alice_token)
        .json(&serde_json::json!({
            "content": "replying across conversations",
            "reply_to_message_id": foreign["id"],
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
}
