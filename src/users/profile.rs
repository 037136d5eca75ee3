//! User profile and directory endpoints.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::files;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub id: String,
    pub email: String,
    pub username: String,
    #[serde(rename = "profilePicture")]
    pub avatar_url: String,
    pub is_online: bool,
    pub last_seen: String,
    pub joined_channels: Vec<String>,
    pub created_at: String,
}

fn load_profile(
    conn: &rusqlite::Connection,
    user_id: &str,
) -> Result<ProfileView, (StatusCode, String)> {
    let mut profile = conn
        .query_row(
            "SELECT id, email, username, avatar_url, is_online, last_seen, created_at
             FROM users WHERE id = ?1",
            [user_id],
            |row| {
                Ok(ProfileView {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    username: row.get(2)?,
                    avatar_url: row.get(3)?,
                    is_online: row.get(4)?,
                    last_seen: row.get(5)?,
                    joined_channels: Vec::new(),
                    created_at: row.get(6)?,
                })
            },
        )
        .map_err(|_| (StatusCode::NOT_FOUND, "User not found".to_string()))?;

    let mut stmt = conn
        .prepare("SELECT channel_id FROM channel_members WHERE user_id = ?1")
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Prepare: {}", e)))?;
    profile.joined_channels = stmt
        .query_map([user_id], |row| row.get(0))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query: {}", e)))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(profile)
}

/// GET /api/users/profile
pub async fn get_profile(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<ProfileView>, (StatusCode, String)> {
    let db = state.db.clone();
    let me = claims.sub;

    let profile = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;
        load_profile(&conn, &me)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(profile))
}

/// PUT /api/users/profile
/// Multipart update: optional `username` field, optional `avatar` file
/// part (validated against the upload policy). Identity fields other
/// than these never change after creation.
pub async fn update_profile(
    State(state): State<AppState>,
    claims: Claims,
    mut multipart: Multipart,
) -> Result<Json<ProfileView>, (StatusCode, String)> {
    let mut username: Option<String> = None;
    let mut avatar_url: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart read: {}", e)))?
    {
        match field.name() {
            Some("username") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart read: {}", e)))?;
                let text = text.trim().to_string();
                if !text.is_empty() {
                    username = Some(text);
                }
            }
            Some("avatar") | Some("profilePicture") => {
                let original_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or((StatusCode::BAD_REQUEST, "File name missing".to_string()))?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart read: {}", e)))?;
                let stored =
                    files::store_upload(&state.data_dir, &original_name, data.to_vec()).await?;
                avatar_url = Some(stored.url);
            }
            _ => {}
        }
    }

    let db = state.db.clone();
    let me = claims.sub;

    let profile = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        if let Some(ref username) = username {
            conn.execute(
                "UPDATE users SET username = ?1 WHERE id = ?2",
                rusqlite::params![username, me],
            )
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update: {}", e)))?;
        }
        if let Some(ref avatar_url) = avatar_url {
            conn.execute(
                "UPDATE users SET avatar_url = ?1 WHERE id = ?2",
                rusqlite::params![avatar_url, me],
            )
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update: {}", e)))?;
        }

        load_profile(&conn, &me)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(profile))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(rename = "profilePicture")]
    pub avatar_url: String,
    pub is_online: bool,
    pub last_seen: String,
}

/// GET /api/users
/// Everyone except the caller, online users first.
pub async fn list_users(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<DirectoryEntry>>, (StatusCode, String)> {
    let db = state.db.clone();
    let me = claims.sub;

    let users = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let mut stmt = conn
            .prepare(
                "SELECT id, username, email, avatar_url, is_online, last_seen
                 FROM users WHERE id != ?1
                 ORDER BY is_online DESC, username ASC",
            )
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Prepare: {}", e)))?;

        let users: Vec<DirectoryEntry> = stmt
            .query_map([&me], |row| {
                Ok(DirectoryEntry {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                    avatar_url: row.get(3)?,
                    is_online: row.get(4)?,
                    last_seen: row.get(5)?,
                })
            })
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, (StatusCode, String)>(users)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(users))
}
