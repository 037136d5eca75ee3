//! Channel CRUD: create, list, join.
//!
//! Channels are open-by-default: listing returns every public channel
//! regardless of membership, and sending into a channel is not gated on
//! membership. Membership is a set that only grows — joining twice is a
//! no-op and nothing ever auto-removes a member.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::ws::protocol::ServerEvent;
use crate::ws::rooms::PRESENCE_ROOM;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub creator: String,
    pub members: Vec<String>,
    pub is_private: bool,
    pub created_at: String,
}

fn channel_members(conn: &Connection, channel_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM channel_members WHERE channel_id = ?1 ORDER BY joined_at")?;
    let members = stmt
        .query_map([channel_id], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(members)
}

/// POST /api/channels
/// Create a channel; the creator becomes its first member. Public
/// channel creation is broadcast to every connected client so their
/// channel lists update live.
pub async fn create_channel(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<CreateChannelRequest>,
) -> Result<(StatusCode, Json<ChannelView>), (StatusCode, String)> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Channel name is required".to_string()));
    }

    let db = state.db.clone();
    let creator = claims.sub.clone();
    let description = req.description.clone();
    let is_private = req.is_private;

    let view = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO channels (id, name, description, creator_id, is_private, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![id, name, description, creator, is_private, now],
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert channel: {}", e)))?;

        conn.execute(
            "INSERT INTO channel_members (channel_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, creator, now],
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert member: {}", e)))?;

        Ok::<_, (StatusCode, String)>(ChannelView {
            id,
            name,
            description,
            creator: creator.clone(),
            members: vec![creator],
            is_private,
            created_at: now,
        })
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    if !view.is_private {
        state.rooms.emit(
            PRESENCE_ROOM,
            &ServerEvent::NewChannel {
                channel: view.clone(),
            },
        );
    }

    tracing::info!(channel = %view.name, creator = %view.creator, "Channel created");

    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/channels
/// Every public channel plus the private channels the caller belongs to,
/// oldest-first.
pub async fn list_channels(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ChannelView>>, (StatusCode, String)> {
    let db = state.db.clone();
    let me = claims.sub;

    let channels = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.name, c.description, c.creator_id, c.is_private, c.created_at
                 FROM channels c
                 WHERE c.is_private = 0
                    OR EXISTS (SELECT 1 FROM channel_members m
                               WHERE m.channel_id = c.id AND m.user_id = ?1)
                 ORDER BY c.created_at ASC",
            )
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Prepare: {}", e)))?;

        let rows: Vec<(String, String, Option<String>, String, bool, String)> = stmt
            .query_map([&me], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        let channels = rows
            .into_iter()
            .map(|(id, name, description, creator, is_private, created_at)| {
                let members = channel_members(&conn, &id).unwrap_or_default();
                ChannelView {
                    id,
                    name,
                    description,
                    creator,
                    members,
                    is_private,
                    created_at,
                }
            })
            .collect();

        Ok::<_, (StatusCode, String)>(channels)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(channels))
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub message: String,
}

/// POST /api/channels/{channel_id}/join
/// Add the caller to the member set. Idempotent — re-joining changes
/// nothing and still reports success.
pub async fn join_channel(
    State(state): State<AppState>,
    claims: Claims,
    Path(channel_id): Path<String>,
) -> Result<Json<JoinResponse>, (StatusCode, String)> {
    let db = state.db.clone();
    let me = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM channels WHERE id = ?1",
                [&channel_id],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .unwrap_or(false);
        if !exists {
            return Err((StatusCode::NOT_FOUND, "Channel not found".to_string()));
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![channel_id, me, now],
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert member: {}", e)))?;

        Ok(())
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(JoinResponse {
        message: "Joined channel".to_string(),
    }))
}
