pub mod actor;
pub mod handler;
pub mod protocol;
pub mod rooms;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Opaque per-connection identifier. A user connected from several
/// devices has several connection ids, each joined to rooms independently.
pub type ConnectionId = Uuid;
