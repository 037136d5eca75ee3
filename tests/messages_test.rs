//! Integration tests for channel messages: submission, validation,
//! pagination, threads, notifications, and the upload policy.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Helper: start the server on a random port and return (base_url, addr).
async fn start_test_server() -> (String, SocketAddr) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = cove_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = cove_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = cove_server::state::AppState {
        db,
        jwt_secret,
        rooms: Arc::new(cove_server::ws::rooms::Rooms::new()),
        presence: Arc::new(dashmap::DashMap::new()),
        data_dir: data_dir.clone(),
        frontend_origin: "http://localhost:3000".to_string(),
    };

    let app = cove_server::routes::build_router(state);
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

    let base_url = format!("http://{}", addr);
    (base_url, addr)
}

/// Register a user and return (token, user_id).
async fn register_user(base_url: &str, email: &str, username: &str) -> (String, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&serde_json::json!({
            "email": email,
            "password": "test-password",
            "username": username,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "Registration failed for {}", email);
    let body: serde_json::Value = resp.json().await.unwrap();
    (
        body["token"].as_str().unwrap().to_string(),
        body["user"]["id"].as_str().unwrap().to_string(),
    )
}

async fn create_channel(base_url: &str, token: &str, name: &str) -> String {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/channels", base_url))
        .header("Authorization", format!("Bearer {}", token))
        .json(&serde_json::json!({ "name": name }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn post_message(
    base_url: &str,
    token: &str,
    channel_id: &str,
    content: &str,
) -> serde_json::Value {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/channels/{}/messages", base_url, channel_id))
        .header("Authorization", format!("Bearer {}", token))
        .json(&serde_json::json!({ "content": content }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "Message send failed: {}", content);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_send_message_populates_sender() {
    let (base_url, _addr) = start_test_server().await;
    let (token, user_id) = register_user(&base_url, "a@example.com", "alice").await;
    let channel_id = create_channel(&base_url, &token, "general").await;

    let message = post_message(&base_url, &token, &channel_id, "hello world").await;
    assert_eq!(message["channel"].as_str().unwrap(), channel_id);
    assert_eq!(message["sender"]["id"].as_str().unwrap(), user_id);
    assert_eq!(message["sender"]["username"].as_str().unwrap(), "alice");
    assert_eq!(message["type"].as_str().unwrap(), "text");
    assert_eq!(message["content"].as_str().unwrap(), "hello world");
    assert_eq!(message["threadReplies"].as_i64().unwrap(), 0);
}

#[tokio::test]
async fn test_empty_text_message_rejected() {
    let (base_url, _addr) = start_test_server().await;
    let (token, _) = register_user(&base_url, "a@example.com", "alice").await;
    let channel_id = create_channel(&base_url, &token, "general").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/channels/{}/messages", base_url, channel_id))
        .header("Authorization", format!("Bearer {}", token))
        .json(&serde_json::json!({ "content": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_message_to_missing_channel_is_404() {
    let (base_url, _addr) = start_test_server().await;
    let (token, _) = register_user(&base_url, "a@example.com", "alice").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/channels/nope/messages", base_url))
        .header("Authorization", format!("Bearer {}", token))
        .json(&serde_json::json!({ "content": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_non_member_can_post_to_public_channel() {
    let (base_url, _addr) = start_test_server().await;
    let (token_a, _) = register_user(&base_url, "a@example.com", "alice").await;
    let (token_b, _) = register_user(&base_url, "b@example.com", "bob").await;
    let channel_id = create_channel(&base_url, &token_a, "general").await;

    // Open-by-default: sending is not gated on membership
    let message = post_message(&base_url, &token_b, &channel_id, "drive-by hello").await;
    assert_eq!(message["sender"]["username"].as_str().unwrap(), "bob");
}

#[tokio::test]
async fn test_pagination_pages_are_strictly_older() {
    let (base_url, _addr) = start_test_server().await;
    let (token, _) = register_user(&base_url, "a@example.com", "alice").await;
    let channel_id = create_channel(&base_url, &token, "general").await;

    for i in 1..=5 {
        post_message(&base_url, &token, &channel_id, &format!("msg {}", i)).await;
    }

    let client = reqwest::Client::new();

    // Page 1: the two newest, oldest-first within the page
    let resp = client
        .get(format!(
            "{}/api/channels/{}/messages?limit=2",
            base_url, channel_id
        ))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let page1: serde_json::Value = resp.json().await.unwrap();
    let page1 = page1.as_array().unwrap();
    assert_eq!(page1.len(), 2);
    assert_eq!(page1[0]["content"].as_str().unwrap(), "msg 4");
    assert_eq!(page1[1]["content"].as_str().unwrap(), "msg 5");

    // Page 2: before = oldest timestamp of page 1
    let cursor = page1[0]["createdAt"].as_str().unwrap();
    let resp = client
        .get(format!(
            "{}/api/channels/{}/messages?limit=2&before={}",
            base_url,
            channel_id,
            urlencode(cursor)
        ))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    let page2: serde_json::Value = resp.json().await.unwrap();
    let page2 = page2.as_array().unwrap();
    assert_eq!(page2.len(), 2);
    assert_eq!(page2[0]["content"].as_str().unwrap(), "msg 2");
    assert_eq!(page2[1]["content"].as_str().unwrap(), "msg 3");
    for message in page2 {
        assert!(message["createdAt"].as_str().unwrap() < cursor);
    }
}

/// Percent-encode the handful of characters RFC 3339 timestamps contain.
fn urlencode(s: &str) -> String {
    s.replace('+', "%2B").replace(':', "%3A")
}

#[tokio::test]
async fn test_thread_reply_updates_parent_counters() {
    let (base_url, _addr) = start_test_server().await;
    let (token_a, _) = register_user(&base_url, "a@example.com", "alice").await;
    let (token_b, _) = register_user(&base_url, "b@example.com", "bob").await;
    let channel_id = create_channel(&base_url, &token_a, "general").await;

    let parent = post_message(&base_url, &token_a, &channel_id, "root message").await;
    let parent_id = parent["id"].as_str().unwrap();
    assert_eq!(parent["threadReplies"].as_i64().unwrap(), 0);

    let client = reqwest::Client::new();
    let resp = client
        .post(format!(
            "{}/api/messages/{}/thread/reply",
            base_url, parent_id
        ))
        .header("Authorization", format!("Bearer {}", token_b))
        .json(&serde_json::json!({ "content": "a reply" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let reply: serde_json::Value = resp.json().await.unwrap();
    // The reply lands in the parent's channel
    assert_eq!(reply["channel"].as_str().unwrap(), channel_id);
    assert_eq!(reply["parentMessage"].as_str().unwrap(), parent_id);

    let thread = client
        .get(format!("{}/api/messages/{}/thread", base_url, parent_id))
        .header("Authorization", format!("Bearer {}", token_a))
        .send()
        .await
        .unwrap();
    assert_eq!(thread.status(), 200);
    let thread: serde_json::Value = thread.json().await.unwrap();
    assert_eq!(thread["parentMessage"]["threadReplies"].as_i64().unwrap(), 1);
    assert!(thread["parentMessage"]["lastReplyAt"].is_string());
    let replies = thread["threadMessages"].as_array().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["content"].as_str().unwrap(), "a reply");
}

#[tokio::test]
async fn test_thread_reply_to_missing_parent_is_404() {
    let (base_url, _addr) = start_test_server().await;
    let (token, _) = register_user(&base_url, "a@example.com", "alice").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/messages/nope/thread/reply", base_url))
        .header("Authorization", format!("Bearer {}", token))
        .json(&serde_json::json!({ "content": "orphan" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_channel_message_notifies_other_members_only() {
    let (base_url, _addr) = start_test_server().await;
    let (token_a, _) = register_user(&base_url, "a@example.com", "alice").await;
    let (token_b, _) = register_user(&base_url, "b@example.com", "bob").await;
    let channel_id = create_channel(&base_url, &token_a, "general").await;

    let client = reqwest::Client::new();
    client
        .post(format!("{}/api/channels/{}/join", base_url, channel_id))
        .header("Authorization", format!("Bearer {}", token_b))
        .send()
        .await
        .unwrap();

    post_message(&base_url, &token_a, &channel_id, "ping everyone").await;

    // Bob (member, not sender) gets exactly one notification
    let resp = client
        .get(format!("{}/api/notifications", base_url))
        .header("Authorization", format!("Bearer {}", token_b))
        .send()
        .await
        .unwrap();
    let notifications: serde_json::Value = resp.json().await.unwrap();
    let notifications = notifications.as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["type"].as_str().unwrap(), "new_message");
    assert_eq!(
        notifications[0]["title"].as_str().unwrap(),
        "New message in #general"
    );
    assert!(notifications[0]["body"].as_str().unwrap().starts_with("alice:"));
    assert_eq!(notifications[0]["read"].as_bool().unwrap(), false);

    // The sender gets none
    let resp = client
        .get(format!("{}/api/notifications", base_url))
        .header("Authorization", format!("Bearer {}", token_a))
        .send()
        .await
        .unwrap();
    let notifications: serde_json::Value = resp.json().await.unwrap();
    assert!(notifications.as_array().unwrap().is_empty());

    // Bulk mark-read flips the flag
    client
        .put(format!("{}/api/notifications/read", base_url))
        .header("Authorization", format!("Bearer {}", token_b))
        .send()
        .await
        .unwrap();
    let resp = client
        .get(format!("{}/api/notifications", base_url))
        .header("Authorization", format!("Bearer {}", token_b))
        .send()
        .await
        .unwrap();
    let notifications: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(notifications.as_array().unwrap()[0]["read"].as_bool(), Some(true));
}

#[tokio::test]
async fn test_upload_policy_rejects_disallowed_extension() {
    let (base_url, _addr) = start_test_server().await;
    let (token, _) = register_user(&base_url, "a@example.com", "alice").await;
    let channel_id = create_channel(&base_url, &token, "general").await;

    let client = reqwest::Client::new();
    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(vec![0x4d, 0x5a]).file_name("payload.exe"),
    );
    let resp = client
        .post(format!("{}/api/channels/{}/messages", base_url, channel_id))
        .header("Authorization", format!("Bearer {}", token))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Nothing was persisted
    let resp = client
        .get(format!("{}/api/channels/{}/messages", base_url, channel_id))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    let messages: serde_json::Value = resp.json().await.unwrap();
    assert!(messages.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_file_message_roundtrip() {
    let (base_url, _addr) = start_test_server().await;
    let (token, _) = register_user(&base_url, "a@example.com", "alice").await;
    let channel_id = create_channel(&base_url, &token, "general").await;

    let client = reqwest::Client::new();
    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(b"meeting notes".to_vec()).file_name("notes.txt"),
    );
    let resp = client
        .post(format!("{}/api/channels/{}/messages", base_url, channel_id))
        .header("Authorization", format!("Bearer {}", token))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let message: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(message["type"].as_str().unwrap(), "file");
    assert_eq!(message["fileName"].as_str().unwrap(), "notes.txt");
    let file_url = message["fileUrl"].as_str().unwrap();
    assert!(file_url.starts_with("/uploads/"));

    // The stored file is served back under /uploads
    let resp = client
        .get(format!("{}{}", base_url, file_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"meeting notes");
}
