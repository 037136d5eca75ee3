//! Emoji reactions, driven by the `addReaction` socket event.
//!
//! Adding is an atomic set-add: the UNIQUE(message_id, user_id, emoji)
//! constraint plus INSERT OR IGNORE means two overlapping adds of the
//! same emoji by the same user collapse to one row — there is no
//! read-modify-write window to race, and a second click is a no-op
//! rather than a toggle.

use chrono::Utc;

use crate::state::AppState;
use crate::ws::protocol::ServerEvent;
use crate::ws::rooms::user_room;

/// Where a reaction event gets delivered, resolved from the message row.
enum Target {
    Channel(String),
    Private { sender_id: String, receiver_id: String },
}

/// Add `emoji` to `message_id` on behalf of `actor_id`, then emit
/// `reactionAdded` to the message's channel room, or to both
/// participants' user rooms for a private message.
pub async fn add_reaction(
    state: &AppState,
    actor_id: &str,
    message_id: &str,
    emoji: &str,
) -> Result<(), String> {
    let emoji = emoji.trim().to_string();
    if emoji.is_empty() || emoji.len() > 64 {
        return Err("Invalid emoji".to_string());
    }

    let db = state.db.clone();
    let mid = message_id.to_string();
    let uid = actor_id.to_string();
    let emoji_clone = emoji.clone();

    let target = tokio::task::spawn_blocking(move || -> Result<Target, String> {
        let conn = db.lock().map_err(|e| format!("DB lock: {}", e))?;

        let row: Option<(Option<String>, String, Option<String>)> = conn
            .query_row(
                "SELECT channel_id, sender_id, receiver_id FROM messages WHERE id = ?1",
                [&mid],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();

        let target = match row {
            Some((Some(channel_id), _, _)) => Target::Channel(channel_id),
            Some((None, sender_id, Some(receiver_id))) => Target::Private {
                sender_id,
                receiver_id,
            },
            Some(_) => return Err("Message has no addressing".to_string()),
            None => return Err("Message not found".to_string()),
        };

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![mid, uid, emoji_clone, now],
        )
        .map_err(|e| format!("Insert reaction: {}", e))?;

        Ok(target)
    })
    .await
    .map_err(|e| format!("Task join: {}", e))??;

    let event = ServerEvent::ReactionAdded {
        message_id: message_id.to_string(),
        emoji,
        user_id: actor_id.to_string(),
    };

    match target {
        Target::Channel(channel_id) => state.rooms.emit(&channel_id, &event),
        Target::Private {
            sender_id,
            receiver_id,
        } => {
            state.rooms.emit(&user_room(&sender_id), &event);
            state.rooms.emit(&user_room(&receiver_id), &event);
        }
    }

    Ok(())
}
