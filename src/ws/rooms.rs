//! Room membership: which live connections receive which events.
//!
//! A room is a named delivery group of currently-connected sessions —
//! channel rooms (keyed by channel id), one fixed room per user, and the
//! presence room every authenticated connection joins. Membership is
//! connection-scoped and ephemeral: it is rebuilt on every connect and
//! dropped wholesale when the connection closes.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use crate::ws::protocol::ServerEvent;
use crate::ws::{ConnectionId, ConnectionSender};

/// Room all authenticated connections join for presence and other
/// everyone-visible broadcasts (bounds the fan-out of "global" events).
pub const PRESENCE_ROOM: &str = "presence";

/// The per-user room name. Private-message delivery targets this room so
/// every session of that user receives the event.
pub fn user_room(user_id: &str) -> String {
    format!("user-{}", user_id)
}

/// Connection-scoped room membership registry.
#[derive(Default)]
pub struct Rooms {
    /// room id -> member connections (sender kept per member for delivery)
    members: DashMap<String, HashMap<ConnectionId, ConnectionSender>>,
    /// reverse index: connection -> rooms it joined, for disconnect cleanup
    joined: DashMap<ConnectionId, HashSet<String>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a connection to a room. Idempotent — joining twice is a no-op.
    pub fn join(&self, conn: ConnectionId, tx: &ConnectionSender, room: &str) {
        self.members
            .entry(room.to_string())
            .or_default()
            .entry(conn)
            .or_insert_with(|| tx.clone());
        self.joined.entry(conn).or_default().insert(room.to_string());
    }

    /// Remove a connection from every room it joined. Called exactly once
    /// when the connection closes; there is no explicit per-room leave.
    pub fn leave_all(&self, conn: ConnectionId) {
        let rooms = match self.joined.remove(&conn) {
            Some((_, rooms)) => rooms,
            None => return,
        };
        for room in rooms {
            let mut empty = false;
            if let Some(mut entry) = self.members.get_mut(&room) {
                entry.remove(&conn);
                empty = entry.is_empty();
            }
            if empty {
                self.members.remove(&room);
            }
        }
    }

    /// Emit an event to every connection in a room. Fire-and-forget: a
    /// closed or slow connection simply misses the event.
    pub fn emit(&self, room: &str, event: &ServerEvent) {
        self.emit_inner(room, None, event);
    }

    /// Emit to a room, skipping one connection (the originating session).
    pub fn emit_except(&self, room: &str, skip: ConnectionId, event: &ServerEvent) {
        self.emit_inner(room, Some(skip), event);
    }

    fn emit_inner(&self, room: &str, skip: Option<ConnectionId>, event: &ServerEvent) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(room = %room, error = %e, "Failed to encode event");
                return;
            }
        };
        let msg = axum::extract::ws::Message::Text(text.into());

        if let Some(entry) = self.members.get(room) {
            for (conn, sender) in entry.iter() {
                if Some(*conn) == skip {
                    continue;
                }
                let _ = sender.send(msg.clone());
            }
        }
    }

    /// Number of connections currently in a room.
    pub fn room_size(&self, room: &str) -> usize {
        self.members.get(room).map(|m| m.len()).unwrap_or(0)
    }
}
