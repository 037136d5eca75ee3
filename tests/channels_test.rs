//! Integration tests for channel creation, listing, and the idempotent
//! join operation.

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

async fn create_channel(
    base_url: &str,
    token: &str,
    name: &str,
    is_private: bool,
) -> serde_json::Value {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/channels", base_url))
        .header("Authorization", format!("Bearer {}", token))
        .json(&serde_json::json!({
            "name": name,
            "description": "test channel",
            "isPrivate": is_private,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "Channel creation failed for {}", name);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_create_channel_makes_creator_first_member() {
    let (base_url, _addr) = start_test_server().await;
    let (token, user_id) = register_user(&base_url, "a@example.com", "alice").await;

    let channel = create_channel(&base_url, &token, "general", false).await;
    assert_eq!(channel["name"].as_str().unwrap(), "general");
    assert_eq!(channel["creator"].as_str().unwrap(), user_id);
    let members = channel["members"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].as_str().unwrap(), user_id);
}

#[tokio::test]
async fn test_public_channel_visible_to_non_members() {
    let (base_url, _addr) = start_test_server().await;
    let (token_a, _) = register_user(&base_url, "a@example.com", "alice").await;
    let (token_b, _) = register_user(&base_url, "b@example.com", "bob").await;

    create_channel(&base_url, &token_a, "general", false).await;

    // Bob never joined, but the public channel shows up in his list
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/api/channels", base_url))
        .header("Authorization", format!("Bearer {}", token_b))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let channels: serde_json::Value = resp.json().await.unwrap();
    let channels = channels.as_array().unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0]["name"].as_str().unwrap(), "general");
}

#[tokio::test]
async fn test_private_channel_hidden_from_non_members() {
    let (base_url, _addr) = start_test_server().await;
    let (token_a, _) = register_user(&base_url, "a@example.com", "alice").await;
    let (token_b, _) = register_user(&base_url, "b@example.com", "bob").await;

    create_channel(&base_url, &token_a, "secret", true).await;

    let client = reqwest::Client::new();

    // The creator sees it
    let resp = client
        .get(format!("{}/api/channels", base_url))
        .header("Authorization", format!("Bearer {}", token_a))
        .send()
        .await
        .unwrap();
    let channels: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(channels.as_array().unwrap().len(), 1);

    // Bob does not
    let resp = client
        .get(format!("{}/api/channels", base_url))
        .header("Authorization", format!("Bearer {}", token_b))
        .send()
        .await
        .unwrap();
    let channels: serde_json::Value = resp.json().await.unwrap();
    assert!(channels.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_join_channel_is_idempotent() {
    let (base_url, _addr) = start_test_server().await;
    let (token_a, user_a) = register_user(&base_url, "a@example.com", "alice").await;
    let (token_b, user_b) = register_user(&base_url, "b@example.com", "bob").await;

    let channel = create_channel(&base_url, &token_a, "general", false).await;
    let channel_id = channel["id"].as_str().unwrap();

    let client = reqwest::Client::new();

    // Join twice — the member set must not grow on the second join
    for _ in 0..2 {
        let resp = client
            .post(format!("{}/api/channels/{}/join", base_url, channel_id))
            .header("Authorization", format!("Bearer {}", token_b))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let resp = client
        .get(format!("{}/api/channels", base_url))
        .header("Authorization", format!("Bearer {}", token_b))
        .send()
        .await
        .unwrap();
    let channels: serde_json::Value = resp.json().await.unwrap();
    let members = channels.as_array().unwrap()[0]["members"].as_array().unwrap();
    assert_eq!(members.len(), 2);
    let member_ids: Vec<&str> = members.iter().map(|m| m.as_str().unwrap()).collect();
    assert!(member_ids.contains(&user_a.as_str()));
    assert!(member_ids.contains(&user_b.as_str()));
}

#[tokio::test]
async fn test_join_missing_channel_is_404() {
    let (base_url, _addr) = start_test_server().await;
    let (token, _) = register_user(&base_url, "a@example.com", "alice").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/channels/no-such-channel/join", base_url))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_empty_channel_name_rejected() {
    let (base_url, _addr) = start_test_server().await;
    let (token, _) = register_user(&base_url, "a@example.com", "alice").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/channels", base_url))
        .header("Authorization", format!("Bearer {}", token))
        .json(&serde_json::json!({ "name": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
