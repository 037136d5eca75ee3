//! REST endpoints for private (direct) conversations: history with
//! read-marking, sending, per-sender unread counts, the conversation
//! list, and private thread replies.

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::chat::messages::{read_message_body, HistoryQuery, CURSOR_MAX, DEFAULT_LIMIT, MAX_LIMIT};
use crate::chat::pipeline::{self, view_from_row, MessageView, MESSAGE_SELECT};
use crate::state::AppState;

/// GET /api/messages/private/{user_id}?limit={n}&before={ts}
/// Page of the conversation with {user_id}, oldest-first. Fetching marks
/// the counterpart's unread messages as read — this is what resets the
/// unread count, so the returned page reflects the new read state.
pub async fn get_private_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageView>>, (StatusCode, String)> {
    let db = state.db.clone();
    let me = claims.sub;
    let before = query.before.unwrap_or_else(|| CURSOR_MAX.to_string());
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let messages = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        // Mark incoming messages read before selecting, so the page
        // already shows them as read
        conn.execute(
            "UPDATE messages SET read = 1
             WHERE is_private = 1 AND receiver_id = ?1 AND sender_id = ?2 AND read = 0",
            rusqlite::params![me, user_id],
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Mark read: {}", e)))?;

        let sql = format!(
            "{} WHERE m.is_private = 1
                 AND ((m.sender_id = ?1 AND m.receiver_id = ?2)
                   OR (m.sender_id = ?2 AND m.receiver_id = ?1))
                 AND m.created_at < ?3
             ORDER BY m.created_at DESC LIMIT ?4",
            MESSAGE_SELECT
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Prepare: {}", e)))?;

        let mut messages: Vec<MessageView> = stmt
            .query_map(
                rusqlite::params![me, user_id, before, limit as i64],
                view_from_row,
            )
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        messages.reverse();
        Ok::<_, (StatusCode, String)>(messages)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(messages))
}

/// POST /api/messages/private/{user_id}
/// Send a private message (text or file) to {user_id}.
pub async fn create_private_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
    req: Request,
) -> Result<(StatusCode, Json<MessageView>), (StatusCode, String)> {
    let body = read_message_body(&state, req).await?;
    let view = pipeline::submit_private_message(&state, &user_id, &claims.sub, body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// POST /api/messages/private/{user_id}/thread
/// Reply in a private thread with {user_id}; the parent must belong to
/// this conversation.
pub async fn private_thread_reply(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
    req: Request,
) -> Result<(StatusCode, Json<MessageView>), (StatusCode, String)> {
    let body = read_message_body(&state, req).await?;
    let parent_id = body.parent_message_id.clone().ok_or((
        StatusCode::BAD_REQUEST,
        "parentMessageId is required".to_string(),
    ))?;
    let view =
        pipeline::reply_in_private_thread(&state, &user_id, &parent_id, &claims.sub, body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub sender_id: String,
    pub count: i64,
}

/// GET /api/messages/unread
/// Unread private-message counts for the caller, grouped by sender.
pub async fn get_unread_counts(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<UnreadCount>>, (StatusCode, String)> {
    let db = state.db.clone();
    let me = claims.sub;

    let counts = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let mut stmt = conn
            .prepare(
                "SELECT sender_id, COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND is_private = 1 AND read = 0
                 GROUP BY sender_id",
            )
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Prepare: {}", e)))?;

        let counts: Vec<UnreadCount> = stmt
            .query_map([&me], |row| {
                Ok(UnreadCount {
                    sender_id: row.get(0)?,
                    count: row.get(1)?,
                })
            })
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, (StatusCode, String)>(counts)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(counts))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub user_id: String,
    pub username: String,
    #[serde(rename = "profilePicture")]
    pub avatar_url: String,
    pub is_online: bool,
    pub last_message_date: String,
}

/// GET /api/messages/conversations
/// Private conversations the caller participates in, newest-first, with
/// the counterpart's profile and online flag.
pub async fn get_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ConversationView>>, (StatusCode, String)> {
    let db = state.db.clone();
    let me = claims.sub;

    let conversations = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let mut stmt = conn
            .prepare(
                "SELECT t.other_id, u.username, u.avatar_url, u.is_online,
                        MAX(t.created_at) AS last_message_date
                 FROM (SELECT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
                              AS other_id,
                              created_at
                       FROM messages
                       WHERE is_private = 1 AND (sender_id = ?1 OR receiver_id = ?1)) t
                 JOIN users u ON u.id = t.other_id
                 GROUP BY t.other_id, u.username, u.avatar_url, u.is_online
                 ORDER BY last_message_date DESC",
            )
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Prepare: {}", e)))?;

        let conversations: Vec<ConversationView> = stmt
            .query_map([&me], |row| {
                Ok(ConversationView {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    avatar_url: row.get(2)?,
                    is_online: row.get(3)?,
                    last_message_date: row.get(4)?,
                })
            })
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, (StatusCode, String)>(conversations)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(conversations))
}
