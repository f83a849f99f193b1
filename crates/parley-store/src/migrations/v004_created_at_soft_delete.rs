//! v004 -- `timestamp` becomes `created_at`; soft-delete markers.
//!
//! Every existing message gets its `timestamp` copied into the new
//! `created_at` column, after which `timestamp` is dropped. Both tables gain
//! a nullable `deleted_at`.

use rusqlite::Connection;

use super::column_exists;

const INDEX_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);
CREATE INDEX IF NOT EXISTS idx_messages_deleted_at ON messages(deleted_at);
CREATE INDEX IF NOT EXISTS idx_users_deleted_at ON users(deleted_at);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    if !column_exists(conn, "messages", "created_at")? {
        conn.execute_batch("ALTER TABLE messages ADD COLUMN created_at TEXT;")?;
    }

    if column_exists(conn, "messages", "timestamp")? {
        let moved = conn.execute(
            "UPDATE messages SET created_at = timestamp
             WHERE created_at IS NULL AND timestamp IS NOT NULL",
            [],
        )?;
        tracing::info!(moved, "copied message timestamps into created_at");

        conn.execute_batch(
            "DROP INDEX IF EXISTS idx_messages_timestamp;
             ALTER TABLE messages DROP COLUMN timestamp;",
        )?;
    }

    if !column_exists(conn, "messages", "deleted_at")? {
        conn.execute_batch("ALTER TABLE messages ADD COLUMN deleted_at TEXT;")?;
    }
    if !column_exists(conn, "users", "deleted_at")? {
        conn.execute_batch("ALTER TABLE users ADD COLUMN deleted_at TEXT;")?;
    }

    conn.execute_batch(INDEX_SQL)
}
