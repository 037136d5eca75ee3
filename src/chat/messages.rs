//! REST endpoints for channel message history and threads.

use axum::{
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::pipeline::{
    self, view_from_row, MessageView, NewMessageBody, MESSAGE_SELECT,
};
use crate::files;
use crate::state::AppState;

/// Default page size for message history.
pub(crate) const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
pub(crate) const MAX_LIMIT: u32 = 100;

/// Timestamps are RFC 3339 and compare lexicographically; this sorts
/// after every real timestamp.
pub(crate) const CURSOR_MAX: &str = "9999-12-31T23:59:59Z";

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// "Before timestamp" pagination cursor (RFC 3339)
    pub before: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMessageJson {
    content: Option<String>,
    parent_message_id: Option<String>,
}

/// Read a new-message body from either a JSON request or a multipart form
/// (fields `content` / `parentMessageId`, optional `file` part). The file
/// is validated against the upload policy and stored before the message
/// is persisted; a rejected file aborts the whole request.
pub(crate) async fn read_message_body(
    state: &AppState,
    req: Request,
) -> Result<NewMessageBody, (StatusCode, String)> {
    let is_multipart = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if !is_multipart {
        let Json(body): Json<CreateMessageJson> = Json::from_request(req, &())
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid body: {}", e)))?;
        return Ok(NewMessageBody {
            content: body.content,
            parent_message_id: body.parent_message_id,
            file: None,
        });
    }

    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid multipart: {}", e)))?;

    let mut body = NewMessageBody::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart read: {}", e)))?
    {
        match field.name() {
            Some("content") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart read: {}", e)))?;
                body.content = Some(text);
            }
            Some("parentMessageId") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart read: {}", e)))?;
                if !text.is_empty() {
                    body.parent_message_id = Some(text);
                }
            }
            Some("file") => {
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
                body.file = Some(stored);
            }
            _ => {}
        }
    }

    Ok(body)
}

/// POST /api/channels/{channel_id}/messages
/// Submit a channel message (text or file). JWT auth required.
pub async fn create_channel_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(channel_id): Path<String>,
    req: Request,
) -> Result<(StatusCode, Json<MessageView>), (StatusCode, String)> {
    let body = read_message_body(&state, req).await?;
    let view = pipeline::submit_channel_message(&state, &channel_id, &claims.sub, body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/channels/{channel_id}/messages?limit={n}&before={ts}
/// Paginated history, oldest-first within the page. The cursor is the
/// `createdAt` of the oldest message already held; it is not a snapshot —
/// concurrent inserts can shift pages.
pub async fn get_channel_messages(
    State(state): State<AppState>,
    _claims: Claims,
    Path(channel_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageView>>, (StatusCode, String)> {
    let db = state.db.clone();
    let before = query.before.unwrap_or_else(|| CURSOR_MAX.to_string());
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let messages = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let sql = format!(
            "{} WHERE m.channel_id = ?1 AND m.created_at < ?2
             ORDER BY m.created_at DESC LIMIT ?3",
            MESSAGE_SELECT
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Prepare: {}", e)))?;

        let mut messages: Vec<MessageView> = stmt
            .query_map(
                rusqlite::params![channel_id, before, limit as i64],
                view_from_row,
            )
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        // Fetched newest-first; clients want the page oldest-first
        messages.reverse();
        Ok::<_, (StatusCode, String)>(messages)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(messages))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResponse {
    pub parent_message: MessageView,
    pub thread_messages: Vec<MessageView>,
}

/// GET /api/messages/{message_id}/thread?limit={n}
/// The thread parent plus its replies, oldest-first.
pub async fn get_thread(
    State(state): State<AppState>,
    _claims: Claims,
    Path(message_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ThreadResponse>, (StatusCode, String)> {
    let db = state.db.clone();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let response = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let parent_sql = format!("{} WHERE m.id = ?1", MESSAGE_SELECT);
        let parent_message = conn
            .query_row(&parent_sql, [&message_id], view_from_row)
            .map_err(|_| (StatusCode::NOT_FOUND, "Message not found".to_string()))?;

        let replies_sql = format!(
            "{} WHERE m.parent_id = ?1 ORDER BY m.created_at ASC LIMIT ?2",
            MESSAGE_SELECT
        );
        let mut stmt = conn
            .prepare(&replies_sql)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Prepare: {}", e)))?;
        let thread_messages: Vec<MessageView> = stmt
            .query_map(rusqlite::params![message_id, limit as i64], view_from_row)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, (StatusCode, String)>(ThreadResponse {
            parent_message,
            thread_messages,
        })
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(response))
}

/// POST /api/messages/{message_id}/thread/reply
/// Reply in a thread. Addressing (channel or private pair) comes from the
/// parent; the reply is fanned out as a distinct thread event.
pub async fn thread_reply(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    req: Request,
) -> Result<(StatusCode, Json<MessageView>), (StatusCode, String)> {
    let body = read_message_body(&state, req).await?;
    let view = pipeline::reply_in_thread(&state, &message_id, &claims.sub, body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}
