//! The message pipeline: validate and persist a new message, keep the
//! parent-thread counters in step, resolve the delivery room(s), fan out
//! the event, and record notifications.
//!
//! Ordering is load-bearing: persistence (including the parent counter
//! bump) completes before fan-out, and fan-out happens before notification
//! writes. Fan-out is fire-and-forget; notification failures are logged
//! and never roll back the message.

use axum::http::StatusCode;
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::db::models::{KIND_TEXT, NOTIFY_MESSAGE, NOTIFY_PRIVATE};
use crate::files::StoredFile;
use crate::notify;
use crate::state::AppState;
use crate::ws::protocol::ServerEvent;
use crate::ws::rooms::user_room;

/// Sender/receiver summary embedded in message payloads.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    #[serde(rename = "profilePicture")]
    pub avatar_url: String,
}

/// A persisted message as clients see it, over REST and over the socket.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub channel: Option<String>,
    pub sender: UserSummary,
    pub receiver: Option<UserSummary>,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Option<String>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub is_private: bool,
    pub read: bool,
    pub parent_message: Option<String>,
    pub thread_replies: i64,
    pub last_reply_at: Option<String>,
    pub created_at: String,
}

/// Validated input for a new message: either text content or an
/// already-stored file, plus an optional thread parent.
#[derive(Debug, Default)]
pub struct NewMessageBody {
    pub content: Option<String>,
    pub parent_message_id: Option<String>,
    pub file: Option<StoredFile>,
}

/// Addressing of an existing message, resolved from its row.
#[derive(Debug, Clone)]
enum Addressing {
    Channel(String),
    Private { sender_id: String, receiver_id: String },
}

/// Persist a channel message, fan it out as `newMessage` to the channel
/// room, and record one notification per member other than the sender.
pub async fn submit_channel_message(
    state: &AppState,
    channel_id: &str,
    sender_id: &str,
    body: NewMessageBody,
) -> Result<MessageView, (StatusCode, String)> {
    let view = persist_channel_message(state, channel_id, sender_id, body).await?;

    state.rooms.emit(channel_id, &ServerEvent::NewMessage(view.clone()));

    notify_channel_members(state, &view).await;

    Ok(view)
}

/// Persist a private message, fan it out as `privateMessage` to both
/// participants' user rooms, and record a notification for the receiver.
pub async fn submit_private_message(
    state: &AppState,
    receiver_id: &str,
    sender_id: &str,
    body: NewMessageBody,
) -> Result<MessageView, (StatusCode, String)> {
    let view = persist_private_message(state, receiver_id, sender_id, body).await?;

    let event = ServerEvent::PrivateMessage(view.clone());
    state.rooms.emit(&user_room(receiver_id), &event);
    state.rooms.emit(&user_room(sender_id), &event);

    notify_private_receiver(state, receiver_id, &view).await;

    Ok(view)
}

/// Reply in the thread rooted at `parent_message_id`. The parent decides
/// the addressing (channel or private pair); the reply is delivered with a
/// distinct thread event so open thread views can route it, and no
/// notifications are recorded.
pub async fn reply_in_thread(
    state: &AppState,
    parent_message_id: &str,
    sender_id: &str,
    mut body: NewMessageBody,
) -> Result<MessageView, (StatusCode, String)> {
    let addressing = resolve_addressing(state, parent_message_id).await?;
    body.parent_message_id = Some(parent_message_id.to_string());

    match addressing {
        Addressing::Channel(channel_id) => {
            let view = persist_channel_message(state, &channel_id, sender_id, body).await?;
            state
                .rooms
                .emit(&channel_id, &ServerEvent::ThreadReply(view.clone()));
            Ok(view)
        }
        Addressing::Private {
            sender_id: a,
            receiver_id: b,
        } => {
            // The replier must be one of the two participants
            let receiver = if sender_id == a {
                b
            } else if sender_id == b {
                a
            } else {
                return Err((
                    StatusCode::BAD_REQUEST,
                    "Not a participant of this conversation".to_string(),
                ));
            };
            let view = persist_private_message(state, &receiver, sender_id, body).await?;
            let event = ServerEvent::PrivateThreadReply(view.clone());
            state.rooms.emit(&user_room(&receiver), &event);
            state.rooms.emit(&user_room(sender_id), &event);
            Ok(view)
        }
    }
}

/// Private-thread variant used by POST /api/messages/private/{user}/thread:
/// the counterpart is named in the URL and must match the parent's pair.
pub async fn reply_in_private_thread(
    state: &AppState,
    counterpart_id: &str,
    parent_message_id: &str,
    sender_id: &str,
    mut body: NewMessageBody,
) -> Result<MessageView, (StatusCode, String)> {
    match resolve_addressing(state, parent_message_id).await? {
        Addressing::Private {
            sender_id: a,
            receiver_id: b,
        } => {
            let pair_matches = (a == sender_id && b == counterpart_id)
                || (b == sender_id && a == counterpart_id);
            if !pair_matches {
                return Err((
                    StatusCode::BAD_REQUEST,
                    "Parent message belongs to a different conversation".to_string(),
                ));
            }
        }
        Addressing::Channel(_) => {
            return Err((
                StatusCode::BAD_REQUEST,
                "Parent message is not private".to_string(),
            ));
        }
    }

    body.parent_message_id = Some(parent_message_id.to_string());
    let view = persist_private_message(state, counterpart_id, sender_id, body).await?;
    let event = ServerEvent::PrivateThreadReply(view.clone());
    state.rooms.emit(&user_room(counterpart_id), &event);
    state.rooms.emit(&user_room(sender_id), &event);
    Ok(view)
}

// --- Persistence ---

async fn resolve_addressing(
    state: &AppState,
    message_id: &str,
) -> Result<Addressing, (StatusCode, String)> {
    let db = state.db.clone();
    let mid = message_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let row: Option<(Option<String>, String, Option<String>)> = conn
            .query_row(
                "SELECT channel_id, sender_id, receiver_id FROM messages WHERE id = ?1",
                [&mid],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();

        match row {
            Some((Some(channel_id), _, _)) => Ok(Addressing::Channel(channel_id)),
            Some((None, sender_id, Some(receiver_id))) => Ok(Addressing::Private {
                sender_id,
                receiver_id,
            }),
            Some(_) => Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Message has no addressing".to_string(),
            )),
            None => Err((StatusCode::NOT_FOUND, "Parent message not found".to_string())),
        }
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))?
}

async fn persist_channel_message(
    state: &AppState,
    channel_id: &str,
    sender_id: &str,
    body: NewMessageBody,
) -> Result<MessageView, (StatusCode, String)> {
    let db = state.db.clone();
    let cid = channel_id.to_string();
    let sid = sender_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let channel_exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM channels WHERE id = ?1",
                [&cid],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .unwrap_or(false);
        if !channel_exists {
            return Err((StatusCode::NOT_FOUND, "Channel not found".to_string()));
        }

        // A reply must live in the same channel as its parent
        if let Some(ref parent_id) = body.parent_message_id {
            let parent_channel: Option<Option<String>> = conn
                .query_row(
                    "SELECT channel_id FROM messages WHERE id = ?1",
                    [parent_id],
                    |row| row.get(0),
                )
                .ok();
            match parent_channel {
                None => {
                    return Err((StatusCode::NOT_FOUND, "Parent message not found".to_string()))
                }
                Some(pc) if pc.as_deref() != Some(cid.as_str()) => {
                    return Err((
                        StatusCode::BAD_REQUEST,
                        "Parent message is in a different channel".to_string(),
                    ))
                }
                Some(_) => {}
            }
        }

        insert_message(&conn, Some(&cid), &sid, None, body)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))?
}

async fn persist_private_message(
    state: &AppState,
    receiver_id: &str,
    sender_id: &str,
    body: NewMessageBody,
) -> Result<MessageView, (StatusCode, String)> {
    let db = state.db.clone();
    let rid = receiver_id.to_string();
    let sid = sender_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let receiver_exists: bool = conn
            .query_row("SELECT COUNT(*) FROM users WHERE id = ?1", [&rid], |row| {
                row.get::<_, i64>(0).map(|c| c > 0)
            })
            .unwrap_or(false);
        if !receiver_exists {
            return Err((StatusCode::NOT_FOUND, "Receiver not found".to_string()));
        }

        // A reply must stay inside the same private pair
        if let Some(ref parent_id) = body.parent_message_id {
            let parent: Option<(Option<String>, String, Option<String>)> = conn
                .query_row(
                    "SELECT channel_id, sender_id, receiver_id FROM messages WHERE id = ?1",
                    [parent_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .ok();
            match parent {
                None => {
                    return Err((StatusCode::NOT_FOUND, "Parent message not found".to_string()))
                }
                Some((Some(_), _, _)) => {
                    return Err((
                        StatusCode::BAD_REQUEST,
                        "Parent message is not private".to_string(),
                    ))
                }
                Some((None, ps, pr)) => {
                    let pr = pr.unwrap_or_default();
                    let pair_matches =
                        (ps == sid && pr == rid) || (ps == rid && pr == sid);
                    if !pair_matches {
                        return Err((
                            StatusCode::BAD_REQUEST,
                            "Parent message belongs to a different conversation".to_string(),
                        ));
                    }
                }
            }
        }

        insert_message(&conn, None, &sid, Some(&rid), body)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))?
}

/// Shared insert: validates content, writes the row, bumps the parent
/// thread counters atomically, and returns the populated view.
/// Runs under the connection lock — callers are inside spawn_blocking.
fn insert_message(
    conn: &Connection,
    channel_id: Option<&str>,
    sender_id: &str,
    receiver_id: Option<&str>,
    body: NewMessageBody,
) -> Result<MessageView, (StatusCode, String)> {
    let sender = lookup_user_summary(conn, sender_id)
        .ok_or((StatusCode::NOT_FOUND, "Sender not found".to_string()))?;
    let receiver = match receiver_id {
        Some(rid) => Some(
            lookup_user_summary(conn, rid)
                .ok_or((StatusCode::NOT_FOUND, "Receiver not found".to_string()))?,
        ),
        None => None,
    };

    let (kind, content, file_url, file_name) = match body.file {
        Some(file) => (file.kind, None, Some(file.url), Some(file.original_name)),
        None => {
            let content = body
                .content
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .ok_or((
                    StatusCode::BAD_REQUEST,
                    "Message content is required".to_string(),
                ))?;
            (KIND_TEXT.to_string(), Some(content), None, None)
        }
    };

    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    let is_private = receiver.is_some();

    conn.execute(
        "INSERT INTO messages (id, channel_id, sender_id, receiver_id, kind, content,
                               file_url, file_name, is_private, parent_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            id,
            channel_id,
            sender_id,
            receiver_id,
            kind,
            content,
            file_url,
            file_name,
            is_private,
            body.parent_message_id,
            now,
        ],
    )
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert message: {}", e)))?;

    // Counter bump is a single atomic UPDATE — no read-modify-write
    if let Some(ref parent_id) = body.parent_message_id {
        conn.execute(
            "UPDATE messages SET thread_replies = thread_replies + 1, last_reply_at = ?1
             WHERE id = ?2",
            rusqlite::params![now, parent_id],
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Bump thread: {}", e)))?;
    }

    Ok(MessageView {
        id,
        channel: channel_id.map(str::to_string),
        sender,
        receiver,
        kind,
        content,
        file_url,
        file_name,
        is_private,
        read: false,
        parent_message: body.parent_message_id,
        thread_replies: 0,
        last_reply_at: None,
        created_at: now,
    })
}

/// Shared SELECT for reading messages with sender (and optional receiver)
/// populated. Column order is what `view_from_row` expects.
pub(crate) const MESSAGE_SELECT: &str = "SELECT m.id, m.channel_id, m.sender_id, m.kind, m.content, m.file_url, m.file_name,
        m.is_private, m.read, m.parent_id, m.thread_replies, m.last_reply_at, m.created_at,
        s.username, s.avatar_url, r.id, r.username, r.avatar_url
 FROM messages m
 JOIN users s ON s.id = m.sender_id
 LEFT JOIN users r ON r.id = m.receiver_id";

/// Map a MESSAGE_SELECT row to a view.
pub(crate) fn view_from_row(row: &rusqlite::Row) -> rusqlite::Result<MessageView> {
    let receiver = match row.get::<_, Option<String>>(15)? {
        Some(id) => Some(UserSummary {
            id,
            username: row.get(16)?,
            avatar_url: row.get(17)?,
        }),
        None => None,
    };
    Ok(MessageView {
        id: row.get(0)?,
        channel: row.get(1)?,
        sender: UserSummary {
            id: row.get(2)?,
            username: row.get(13)?,
            avatar_url: row.get(14)?,
        },
        receiver,
        kind: row.get(3)?,
        content: row.get(4)?,
        file_url: row.get(5)?,
        file_name: row.get(6)?,
        is_private: row.get(7)?,
        read: row.get(8)?,
        parent_message: row.get(9)?,
        thread_replies: row.get(10)?,
        last_reply_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

pub(crate) fn lookup_user_summary(conn: &Connection, user_id: &str) -> Option<UserSummary> {
    conn.query_row(
        "SELECT id, username, avatar_url FROM users WHERE id = ?1",
        [user_id],
        |row| {
            Ok(UserSummary {
                id: row.get(0)?,
                username: row.get(1)?,
                avatar_url: row.get(2)?,
            })
        },
    )
    .ok()
}

// --- Notifications (best-effort, after fan-out) ---

/// Short body preview for notifications, capped at 100 characters.
fn preview(view: &MessageView) -> String {
    match view.content {
        Some(ref content) => content.chars().take(100).collect(),
        None => "Sent a file".to_string(),
    }
}

async fn notify_channel_members(state: &AppState, view: &MessageView) {
    let db = state.db.clone();
    let channel_id = match view.channel {
        Some(ref cid) => cid.clone(),
        None => return,
    };
    let sender_id = view.sender.id.clone();
    let title_sender = view.sender.username.clone();
    let body_text = preview(view);
    let message_id = view.id.clone();

    let result = tokio::task::spawn_blocking(move || -> Result<(), String> {
        let conn = db.lock().map_err(|e| format!("DB lock: {}", e))?;

        let channel_name: String = conn
            .query_row(
                "SELECT name FROM channels WHERE id = ?1",
                [&channel_id],
                |row| row.get(0),
            )
            .map_err(|e| format!("Channel lookup: {}", e))?;

        let mut stmt = conn
            .prepare("SELECT user_id FROM channel_members WHERE channel_id = ?1 AND user_id != ?2")
            .map_err(|e| format!("Prepare members: {}", e))?;
        let members: Vec<String> = stmt
            .query_map(rusqlite::params![channel_id, sender_id], |row| row.get(0))
            .map_err(|e| format!("Query members: {}", e))?
            .filter_map(|r| r.ok())
            .collect();

        let data = json!({ "channelId": channel_id, "messageId": message_id });
        for member in members {
            notify::insert_notification(
                &conn,
                &member,
                NOTIFY_MESSAGE,
                &format!("New message in #{}", channel_name),
                &format!("{}: {}", title_sender, body_text),
                &data,
            )
            .map_err(|e| format!("Insert notification: {}", e))?;
        }
        Ok(())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to create channel notifications"),
        Err(e) => tracing::warn!(error = %e, "Notification task failed"),
    }
}

async fn notify_private_receiver(state: &AppState, receiver_id: &str, view: &MessageView) {
    let db = state.db.clone();
    let receiver = receiver_id.to_string();
    let sender_id = view.sender.id.clone();
    let sender_name = view.sender.username.clone();
    let body_text = preview(view);
    let message_id = view.id.clone();

    let result = tokio::task::spawn_blocking(move || -> Result<(), String> {
        let conn = db.lock().map_err(|e| format!("DB lock: {}", e))?;
        let data = json!({ "senderId": sender_id, "messageId": message_id });
        notify::insert_notification(
            &conn,
            &receiver,
            NOTIFY_PRIVATE,
            &format!("New message from {}", sender_name),
            &body_text,
            &data,
        )
        .map_err(|e| format!("Insert notification: {}", e))
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to create private notification"),
        Err(e) => tracing::warn!(error = %e, "Notification task failed"),
    }
}
