//! Integration tests for registration, login, profile access, and the
//! SSO return leg.

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

#[tokio::test]
async fn test_register_returns_token_and_user() {
    let (base_url, _addr) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&serde_json::json!({
            "email": "alice@example.com",
            "password": "correct horse",
            "username": "alice",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(!body["token"].as_str().unwrap().is_empty());
    assert_eq!(body["user"]["email"].as_str().unwrap(), "alice@example.com");
    assert_eq!(body["user"]["username"].as_str().unwrap(), "alice");
    assert_eq!(
        body["user"]["profilePicture"].as_str().unwrap(),
        "/default-avatar.png"
    );
}

#[tokio::test]
async fn test_register_duplicate_email_rejected() {
    let (base_url, _addr) = start_test_server().await;
    let client = reqwest::Client::new();

    let payload = serde_json::json!({
        "email": "bob@example.com",
        "password": "pw1",
        "username": "bob",
    });

    let first = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 201);

    let second = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&serde_json::json!({
            "email": "bob@example.com",
            "password": "pw2",
            "username": "bob2",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 400);
}

#[tokio::test]
async fn test_login_and_bad_password() {
    let (base_url, _addr) = start_test_server().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/auth/register", base_url))
        .json(&serde_json::json!({
            "email": "carol@example.com",
            "password": "sekrit",
            "username": "carol",
        }))
        .send()
        .await
        .unwrap();

    let ok = client
        .post(format!("{}/api/auth/login", base_url))
        .json(&serde_json::json!({
            "email": "carol@example.com",
            "password": "sekrit",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let body: serde_json::Value = ok.json().await.unwrap();
    assert!(!body["token"].as_str().unwrap().is_empty());

    let bad = client
        .post(format!("{}/api/auth/login", base_url))
        .json(&serde_json::json!({
            "email": "carol@example.com",
            "password": "wrong",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 401);
}

#[tokio::test]
async fn test_profile_requires_token() {
    let (base_url, _addr) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/users/profile", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_profile_roundtrip() {
    let (base_url, _addr) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&serde_json::json!({
            "email": "dave@example.com",
            "password": "pw",
            "username": "dave",
        }))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    let token = body["token"].as_str().unwrap();

    let profile = client
        .get(format!("{}/api/users/profile", base_url))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    assert_eq!(profile.status(), 200);
    let profile: serde_json::Value = profile.json().await.unwrap();
    assert_eq!(profile["username"].as_str().unwrap(), "dave");
    assert_eq!(profile["isOnline"].as_bool().unwrap(), false);
    assert!(profile["joinedChannels"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_sso_callback_creates_user_and_redirects() {
    let (base_url, _addr) = start_test_server().await;
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let resp = client
        .get(format!("{}/auth/sso/callback", base_url))
        .header("X-Auth-Request-Email", "eve@example.com")
        .header("X-Auth-Request-User", "eve")
        .header("X-Auth-Request-Subject", "sso-subject-1")
        .send()
        .await
        .unwrap();

    assert!(resp.status().is_redirection());
    let location = resp
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(location.starts_with("http://localhost:3000/auth-success?token="));

    // The issued token must work against the API
    let token = location.split("token=").nth(1).unwrap();
    let profile = client
        .get(format!("{}/api/users/profile", base_url))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    assert_eq!(profile.status(), 200);
    let profile: serde_json::Value = profile.json().await.unwrap();
    assert_eq!(profile["email"].as_str().unwrap(), "eve@example.com");
}

#[tokio::test]
async fn test_sso_callback_without_identity_rejected() {
    let (base_url, _addr) = start_test_server().await;
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let resp = client
        .get(format!("{}/auth/sso/callback", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}
