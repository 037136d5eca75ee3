//! Presence: online/offline status and last-seen, derived from the
//! connection lifecycle and broadcast to the presence room.
//!
//! Sessions are reference-counted per user: a user with three tabs open
//! stays online until the last one closes. Only the 0→1 and 1→0
//! transitions touch the store or broadcast anything. last_seen is
//! updated exclusively on disconnect.

use chrono::Utc;

use crate::state::AppState;
use crate::ws::protocol::ServerEvent;
use crate::ws::rooms::PRESENCE_ROOM;
use crate::ws::ConnectionId;

/// Called when an authenticated connection opens. If it is the user's
/// first live session, persist the online flag and tell everyone else.
pub async fn connection_opened(state: &AppState, user_id: &str, conn_id: ConnectionId) {
    let sessions = {
        let mut entry = state.presence.entry(user_id.to_string()).or_insert(0);
        *entry += 1;
        *entry
    };

    if sessions > 1 {
        tracing::debug!(user_id = %user_id, sessions, "Additional session opened");
        return;
    }

    set_online_flag(state, user_id, true, None).await;

    state.rooms.emit_except(
        PRESENCE_ROOM,
        conn_id,
        &ServerEvent::UserStatusUpdate {
            user_id: user_id.to_string(),
            is_online: true,
            last_seen: None,
        },
    );
}

/// Called when a connection closes (after its rooms are cleaned up).
/// Only the last session's close marks the user offline.
pub async fn connection_closed(state: &AppState, user_id: &str) {
    let went_offline = {
        let mut remove = false;
        if let Some(mut entry) = state.presence.get_mut(user_id) {
            let remaining = entry.saturating_sub(1);
            *entry = remaining;
            remove = remaining == 0;
        }
        if remove {
            state.presence.remove(user_id);
        }
        remove
    };

    if !went_offline {
        tracing::debug!(user_id = %user_id, "Session closed, others remain");
        return;
    }

    let last_seen = Utc::now().to_rfc3339();
    set_online_flag(state, user_id, false, Some(last_seen.clone())).await;

    state.rooms.emit(
        PRESENCE_ROOM,
        &ServerEvent::UserStatusUpdate {
            user_id: user_id.to_string(),
            is_online: false,
            last_seen: Some(last_seen),
        },
    );
}

/// Persist the online flag (and last_seen on disconnect). Presence is
/// reconstructible state — a store failure here is logged, not fatal.
async fn set_online_flag(state: &AppState, user_id: &str, online: bool, last_seen: Option<String>) {
    let db = state.db.clone();
    let uid = user_id.to_string();

    let result = tokio::task::spawn_blocking(move || -> Result<(), String> {
        let conn = db.lock().map_err(|e| format!("DB lock: {}", e))?;
        match last_seen {
            Some(ts) => conn.execute(
                "UPDATE users SET is_online = 0, last_seen = ?1 WHERE id = ?2",
                rusqlite::params![ts, uid],
            ),
            None => conn.execute(
                "UPDATE users SET is_online = ?1 WHERE id = ?2",
                rusqlite::params![online, uid],
            ),
        }
        .map_err(|e| format!("Update presence: {}", e))?;
        Ok(())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to persist presence"),
        Err(e) => tracing::warn!(error = %e, "Presence task failed"),
    }
}
