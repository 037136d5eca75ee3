/// Database row types for all tables.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.

/// User record in the users table
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub sso_subject: Option<String>,
    pub username: String,
    pub avatar_url: String,
    pub is_online: bool,
    pub last_seen: String,
    pub push_subscription: Option<String>,
    pub created_at: String,
}

/// Chat channel. The creator is always the first member.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub creator_id: String,
    pub is_private: bool,
    pub created_at: String,
}

/// Channel membership entry (set semantics, never auto-removed)
#[derive(Debug, Clone)]
pub struct ChannelMember {
    pub channel_id: String,
    pub user_id: String,
    pub joined_at: String,
}

/// Message kinds stored in the `kind` column.
pub const KIND_TEXT: &str = "text";
pub const KIND_IMAGE: &str = "image";
pub const KIND_FILE: &str = "file";

/// Persisted message. Addressed to exactly one of a channel
/// (channel_id set) or a private pair (receiver_id set).
/// thread_replies / last_reply_at are maintained only on a thread parent.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub channel_id: Option<String>,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub kind: String,
    pub content: Option<String>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub is_private: bool,
    pub read: bool,
    pub parent_id: Option<String>,
    pub thread_replies: i64,
    pub last_reply_at: Option<String>,
    pub created_at: String,
}

/// Emoji reaction on a message (one row per user per emoji)
#[derive(Debug, Clone)]
pub struct Reaction {
    pub id: i64,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

/// Notification kinds stored in the `kind` column.
pub const NOTIFY_MESSAGE: &str = "new_message";
pub const NOTIFY_PRIVATE: &str = "private_message";

/// Notification created as a side effect of message delivery.
/// Only mutated via bulk mark-read.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub data: Option<String>,
    pub read: bool,
    pub created_at: String,
}
