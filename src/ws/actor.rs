use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::chat::presence;
use crate::state::AppState;
use crate::ws::protocol::{self, ConnContext};
use crate::ws::rooms::{user_room, PRESENCE_ROOM};

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Prevents connection leaks from abrupt disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming messages, dispatches to protocol handlers
///
/// On startup the connection is joined to its delivery rooms (own user
/// room, the presence room, and every channel visible to the user — public
/// plus private-where-member). This happens once per connection, not per
/// message. On exit every room association is dropped and presence is
/// re-evaluated.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = Uuid::now_v7();

    // Resolve the username and the user's channel list from the store
    let (username, channel_ids) = {
        let db = state.db.clone();
        let uid = user_id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().ok()?;
            let username: String = conn
                .query_row("SELECT username FROM users WHERE id = ?1", [&uid], |row| {
                    row.get(0)
                })
                .ok()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM channels WHERE is_private = 0
                     UNION
                     SELECT channel_id FROM channel_members WHERE user_id = ?1",
                )
                .ok()?;
            let channels: Vec<String> = stmt
                .query_map([&uid], |row| row.get(0))
                .ok()?
                .filter_map(|r| r.ok())
                .collect();
            Some((username, channels))
        })
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| ("Unknown".to_string(), Vec::new()))
    };

    // Auto-join delivery rooms: personal room, presence room, channel rooms
    state.rooms.join(conn_id, &tx, &user_room(&user_id));
    state.rooms.join(conn_id, &tx, PRESENCE_ROOM);
    for channel_id in &channel_ids {
        state.rooms.join(conn_id, &tx, channel_id);
    }

    // Mark online and broadcast to everyone else if this is the first session
    presence::connection_opened(&state, &user_id, conn_id).await;

    tracing::info!(
        user_id = %user_id,
        username = %username,
        channels = channel_ids.len(),
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            // Send ping
            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            // Wait for pong within timeout
            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    // Pong timeout or channel closed — close connection
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    let ctx = ConnContext {
        conn_id,
        user_id: user_id.clone(),
        username,
    };

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &state, &ctx, &tx).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        user_id = %user_id,
                        "Received binary frame (protocol is JSON text)"
                    );
                }
                Message::Pong(_) => {
                    // Pong received — notify the ping task
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    // Respond to client pings with pong
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                // Stream ended — client disconnected
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    ping_handle.abort();

    // Drop every room association for this connection
    state.rooms.leave_all(conn_id);

    // Mark offline and broadcast only if this was the user's last session
    presence::connection_closed(&state, &user_id).await;

    tracing::info!(user_id = %user_id, "WebSocket actor stopped");
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
