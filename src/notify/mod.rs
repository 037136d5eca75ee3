//! Notifications: created as a side effect of message delivery, read via
//! REST, mutated only by bulk mark-read.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::state::AppState;

/// How many notifications the list endpoint returns.
const LIST_LIMIT: u32 = 20;

/// Insert a notification row. Called from the message pipeline's
/// blocking sections, after fan-out — a failure here is the caller's to
/// log, never to propagate into the message submission.
pub fn insert_notification(
    conn: &Connection,
    user_id: &str,
    kind: &str,
    title: &str,
    body: &str,
    data: &serde_json::Value,
) -> rusqlite::Result<()> {
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO notifications (id, user_id, kind, title, body, data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![id, user_id, kind, title, body, data.to_string(), now],
    )?;
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub body: String,
    pub data: Option<serde_json::Value>,
    pub read: bool,
    pub created_at: String,
}

/// GET /api/notifications
/// The caller's most recent notifications, newest-first.
pub async fn list_notifications(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<NotificationView>>, (StatusCode, String)> {
    let db = state.db.clone();
    let me = claims.sub;

    let notifications = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let mut stmt = conn
            .prepare(
                "SELECT id, kind, title, body, data, read, created_at
                 FROM notifications WHERE user_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Prepare: {}", e)))?;

        let notifications: Vec<NotificationView> = stmt
            .query_map(rusqlite::params![me, LIST_LIMIT], |row| {
                let data: Option<String> = row.get(4)?;
                Ok(NotificationView {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    title: row.get(2)?,
                    body: row.get(3)?,
                    data: data.and_then(|d| serde_json::from_str(&d).ok()),
                    read: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, (StatusCode, String)>(notifications)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(notifications))
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub message: String,
}

/// PUT /api/notifications/read
/// Bulk mark-read for everything unread belonging to the caller.
pub async fn mark_notifications_read(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<MarkReadResponse>, (StatusCode, String)> {
    let db = state.db.clone();
    let me = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;
        conn.execute(
            "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
            [&me],
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Mark read: {}", e)))?;
        Ok::<(), (StatusCode, String)>(())
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(MarkReadResponse {
        message: "Notifications marked as read".to_string(),
    }))
}
