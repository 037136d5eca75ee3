use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking — no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Accounts and channels

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT,
    sso_subject TEXT,
    username TEXT NOT NULL,
    avatar_url TEXT NOT NULL DEFAULT '/default-avatar.png',
    is_online INTEGER NOT NULL DEFAULT 0,
    last_seen TEXT NOT NULL,
    push_subscription TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_users_sso_subject ON users(sso_subject);

CREATE TABLE channels (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    creator_id TEXT NOT NULL,
    is_private INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (creator_id) REFERENCES users(id)
);

-- Membership is a set: the composite key makes re-joining a no-op
-- via INSERT OR IGNORE.
CREATE TABLE channel_members (
    channel_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (channel_id, user_id),
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX idx_channel_members_user ON channel_members(user_id);
",
        ),
        M::up(
            "-- Migration 2: Messages and threads

-- A message is addressed to exactly one of: a channel (channel_id set)
-- or a private pair (receiver_id set, is_private = 1). Never both.
CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    channel_id TEXT,
    sender_id TEXT NOT NULL,
    receiver_id TEXT,
    kind TEXT NOT NULL DEFAULT 'text',
    content TEXT,
    file_url TEXT,
    file_name TEXT,
    is_private INTEGER NOT NULL DEFAULT 0,
    read INTEGER NOT NULL DEFAULT 0,
    parent_id TEXT,
    thread_replies INTEGER NOT NULL DEFAULT 0,
    last_reply_at TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id),
    FOREIGN KEY (receiver_id) REFERENCES users(id),
    FOREIGN KEY (parent_id) REFERENCES messages(id)
);

CREATE INDEX idx_messages_channel_time ON messages(channel_id, created_at);
CREATE INDEX idx_messages_private_pair ON messages(sender_id, receiver_id, created_at);
CREATE INDEX idx_messages_parent ON messages(parent_id);
CREATE INDEX idx_messages_unread ON messages(receiver_id, read);
",
        ),
        M::up(
            "-- Migration 3: Reactions and notifications

-- The UNIQUE constraint makes reaction insertion an atomic set-add:
-- INSERT OR IGNORE collapses a duplicate (user, emoji) to a no-op.
CREATE TABLE reactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    emoji TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id),
    UNIQUE(message_id, user_id, emoji)
);
CREATE INDEX idx_reactions_message ON reactions(message_id);

CREATE TABLE notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    data TEXT,
    read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
CREATE INDEX idx_notifications_user ON notifications(user_id, read);
",
        ),
    ])
}
