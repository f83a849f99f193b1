//! v002 -- Initial schema creation.
//!
//! Creates the `messages` and `users` tables. Messages are keyed by their
//! client-assigned id and still carry the send time in `timestamp`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 2.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,      -- client-assigned, opaque
    text        TEXT NOT NULL DEFAULT '',
    sender_id   TEXT NOT NULL,
    sender_name TEXT NOT NULL DEFAULT '',
    channel_id  TEXT NOT NULL DEFAULT '',
    timestamp   TEXT NOT NULL,                  -- ISO-8601
    status      TEXT NOT NULL DEFAULT 'sent',   -- sent | delivered | seen | error
    is_local    INTEGER NOT NULL DEFAULT 0,     -- boolean 0/1
    attachments TEXT NOT NULL DEFAULT '[]'      -- JSON array
);

CREATE INDEX IF NOT EXISTS idx_messages_sender_id ON messages(sender_id);
CREATE INDEX IF NOT EXISTS idx_messages_channel_id ON messages(channel_id);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);
CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(status);

-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,
    username   TEXT NOT NULL,
    status     TEXT NOT NULL DEFAULT 'offline', -- online | offline | away
    last_seen  TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
