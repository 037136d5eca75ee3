//! Registration, login, and the SSO return leg.
//!
//! Password accounts use bcrypt hashes. SSO identities are asserted by the
//! fronting auth proxy via X-Auth-Request-* headers; the server only
//! find-or-creates the matching user and issues its own JWT.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Redirect,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::jwt;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Public view of a user account, returned by auth and profile endpoints.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: String,
    pub email: String,
    pub username: String,
    #[serde(rename = "profilePicture")]
    pub avatar_url: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserView,
}

/// POST /api/auth/register
/// Create a password account. 400 if the email is already registered.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), (StatusCode, String)> {
    let email = req.email.trim().to_lowercase();
    let username = req.username.trim().to_string();
    if email.is_empty() || username.is_empty() || req.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "email, password and username are required".to_string(),
        ));
    }

    // bcrypt is CPU-bound — keep it off the async runtime
    let password_hash = tokio::task::spawn_blocking(move || {
        bcrypt::hash(req.password, bcrypt::DEFAULT_COST)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))?
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Hash: {}", e)))?;

    let db = state.db.clone();
    let jwt_secret = state.jwt_secret.clone();

    let result = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        // Check email uniqueness
        let existing: Option<String> = conn
            .query_row("SELECT id FROM users WHERE email = ?1", [&email], |row| {
                row.get(0)
            })
            .ok();
        if existing.is_some() {
            return Err((StatusCode::BAD_REQUEST, "Email already registered".to_string()));
        }

        let user_id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO users (id, email, password_hash, username, last_seen, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![user_id, email, password_hash, username, now, now],
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert user: {}", e)))?;

        let token = jwt::issue_access_token(&jwt_secret, &user_id, &email)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("JWT: {}", e)))?;

        Ok(AuthResponse {
            token,
            user: UserView {
                id: user_id,
                email,
                username,
                avatar_url: "/default-avatar.png".to_string(),
            },
        })
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    tracing::info!("User registered: {} ({})", result.user.username, result.user.email);

    Ok((StatusCode::CREATED, Json(result)))
}

/// POST /api/auth/login
/// Verify credentials and issue a token. 401 on any mismatch — the
/// response never says whether the email or the password was wrong.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let email = req.email.trim().to_lowercase();
    let db = state.db.clone();

    let row = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        conn.query_row(
            "SELECT id, password_hash, username, avatar_url FROM users WHERE email = ?1",
            [&email],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .ok()
        .map(|r| (email, r))
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))?;

    let invalid = || (StatusCode::UNAUTHORIZED, "Invalid email or password".to_string());

    let (email, (user_id, password_hash, username, avatar_url)) = row.ok_or_else(invalid)?;
    // SSO-only accounts have no password hash and cannot log in here
    let password_hash = password_hash.ok_or_else(invalid)?;

    let valid = tokio::task::spawn_blocking(move || bcrypt::verify(req.password, &password_hash))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))?
        .unwrap_or(false);
    if !valid {
        return Err(invalid());
    }

    let token = jwt::issue_access_token(&state.jwt_secret, &user_id, &email)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("JWT: {}", e)))?;

    Ok(Json(AuthResponse {
        token,
        user: UserView {
            id: user_id,
            email,
            username,
            avatar_url,
        },
    }))
}

/// GET /auth/sso/callback
///
/// Return leg of the external SSO flow. The auth proxy has already
/// authenticated the browser and asserts the identity via headers:
/// X-Auth-Request-Email (required), X-Auth-Request-User (display name),
/// X-Auth-Request-Subject (stable provider subject).
///
/// Find-or-create order matches the original flow: by subject first, then
/// by email (linking the subject to an existing password account), then a
/// fresh account. Redirects to {frontend_origin}/auth-success?token=...
pub async fn sso_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Redirect, (StatusCode, String)> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let email = header("x-auth-request-email")
        .map(|e| e.to_lowercase())
        .ok_or((StatusCode::UNAUTHORIZED, "Missing SSO identity".to_string()))?;
    let username = header("x-auth-request-user").unwrap_or_else(|| email.clone());
    let subject = header("x-auth-request-subject");

    let db = state.db.clone();

    let (user_id, email) = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        // Known subject?
        if let Some(ref sub) = subject {
            let found: Option<(String, String)> = conn
                .query_row(
                    "SELECT id, email FROM users WHERE sso_subject = ?1",
                    [sub],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .ok();
            if let Some(found) = found {
                return Ok(found);
            }
        }

        // Existing password account with this email — link the subject
        let by_email: Option<String> = conn
            .query_row("SELECT id FROM users WHERE email = ?1", [&email], |row| {
                row.get(0)
            })
            .ok();
        if let Some(id) = by_email {
            if let Some(ref sub) = subject {
                conn.execute(
                    "UPDATE users SET sso_subject = ?1 WHERE id = ?2",
                    rusqlite::params![sub, id],
                )
                .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Link SSO: {}", e)))?;
            }
            return Ok((id, email));
        }

        // Fresh SSO-only account (no password hash)
        let user_id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (id, email, sso_subject, username, last_seen, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![user_id, email, subject, username, now, now],
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert user: {}", e)))?;

        Ok((user_id, email))
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    let token = jwt::issue_access_token(&state.jwt_secret, &user_id, &email)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("JWT: {}", e)))?;

    Ok(Redirect::to(&format!(
        "{}/auth-success?token={}",
        state.frontend_origin, token
    )))
}
