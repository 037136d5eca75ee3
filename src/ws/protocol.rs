//! The socket event protocol: JSON envelopes `{"event": ..., "data": ...}`
//! in both directions, dispatched by event name.
//!
//! Client events are fire-and-forget — a malformed or unknown event is
//! logged and dropped, never answered with an error frame. Typing
//! indicators carry no delivery guarantee; the receiving client expires a
//! stale indicator after 3 seconds on its own.

use serde::{Deserialize, Serialize};

use crate::channels::crud::ChannelView;
use crate::chat::pipeline::MessageView;
use crate::chat::reactions;
use crate::state::AppState;
use crate::ws::rooms::user_room;
use crate::ws::ConnectionId;

/// Events a client may send after authentication.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Join a single channel room, announcing the arrival to the room.
    JoinChannel(String),
    /// Bulk re-join (client-driven after e.g. receiving newChannel).
    JoinChannels(Vec<String>),
    #[serde(rename_all = "camelCase")]
    Typing { channel_id: String, is_typing: bool },
    #[serde(rename_all = "camelCase")]
    PrivateTyping { user_id: String, is_typing: bool },
    #[serde(rename_all = "camelCase")]
    AddReaction {
        message_id: String,
        emoji: String,
        #[serde(default)]
        channel_id: Option<String>,
        #[serde(default)]
        private_user_id: Option<String>,
    },
    /// Opaque push subscription stored against the user.
    SubscribePush(serde_json::Value),
}

/// Events the server pushes to rooms or users.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    NewMessage(MessageView),
    NewChannel { channel: ChannelView },
    PrivateMessage(MessageView),
    ThreadReply(MessageView),
    PrivateThreadReply(MessageView),
    #[serde(rename_all = "camelCase")]
    UserStatusUpdate {
        user_id: String,
        is_online: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UserTyping {
        user_id: String,
        username: String,
        channel_id: String,
        is_typing: bool,
    },
    #[serde(rename_all = "camelCase")]
    UserPrivateTyping {
        user_id: String,
        username: String,
        is_typing: bool,
    },
    #[serde(rename_all = "camelCase")]
    UserJoinedChannel { user_id: String, username: String },
    #[serde(rename_all = "camelCase")]
    ReactionAdded {
        message_id: String,
        emoji: String,
        user_id: String,
    },
}

/// Identity of an authenticated connection, resolved once at handshake.
#[derive(Debug, Clone)]
pub struct ConnContext {
    pub conn_id: ConnectionId,
    pub user_id: String,
    pub username: String,
}

/// Handle one incoming text frame: decode the envelope and dispatch.
pub async fn handle_text_message(
    text: &str,
    state: &AppState,
    ctx: &ConnContext,
    tx: &crate::ws::ConnectionSender,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(
                user_id = %ctx.user_id,
                error = %e,
                "Ignoring malformed client event"
            );
            return;
        }
    };

    match event {
        ClientEvent::JoinChannel(channel_id) => {
            state.rooms.join(ctx.conn_id, tx, &channel_id);
            state.rooms.emit_except(
                &channel_id,
                ctx.conn_id,
                &ServerEvent::UserJoinedChannel {
                    user_id: ctx.user_id.clone(),
                    username: ctx.username.clone(),
                },
            );
        }
        ClientEvent::JoinChannels(channel_ids) => {
            for channel_id in channel_ids {
                state.rooms.join(ctx.conn_id, tx, &channel_id);
            }
        }
        ClientEvent::Typing {
            channel_id,
            is_typing,
        } => {
            state.rooms.emit_except(
                &channel_id,
                ctx.conn_id,
                &ServerEvent::UserTyping {
                    user_id: ctx.user_id.clone(),
                    username: ctx.username.clone(),
                    channel_id: channel_id.clone(),
                    is_typing,
                },
            );
        }
        ClientEvent::PrivateTyping { user_id, is_typing } => {
            // Delivered to every session of the counterpart, none of ours
            state.rooms.emit(
                &user_room(&user_id),
                &ServerEvent::UserPrivateTyping {
                    user_id: ctx.user_id.clone(),
                    username: ctx.username.clone(),
                    is_typing,
                },
            );
        }
        ClientEvent::AddReaction {
            message_id, emoji, ..
        } => {
            if let Err(e) = reactions::add_reaction(state, &ctx.user_id, &message_id, &emoji).await
            {
                tracing::warn!(
                    user_id = %ctx.user_id,
                    message_id = %message_id,
                    error = %e,
                    "Failed to add reaction"
                );
            }
        }
        ClientEvent::SubscribePush(subscription) => {
            store_push_subscription(state, ctx, subscription).await;
        }
    }
}

async fn store_push_subscription(
    state: &AppState,
    ctx: &ConnContext,
    subscription: serde_json::Value,
) {
    let db = state.db.clone();
    let user_id = ctx.user_id.clone();
    let username = ctx.username.clone();

    let result = tokio::task::spawn_blocking(move || -> Result<(), String> {
        let conn = db.lock().map_err(|e| format!("DB lock: {}", e))?;
        conn.execute(
            "UPDATE users SET push_subscription = ?1 WHERE id = ?2",
            rusqlite::params![subscription.to_string(), user_id],
        )
        .map_err(|e| format!("Update subscription: {}", e))?;
        Ok(())
    })
    .await;

    match result {
        Ok(Ok(())) => tracing::debug!(username = %username, "Push subscription stored"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to store push subscription"),
        Err(e) => tracing::warn!(error = %e, "Push subscription task failed"),
    }
}
