//! Database migration runner.
//!
//! Migrations are executed in version order on every [`Database`] open. Each
//! one runs inside its own transaction together with the `user_version`
//! bump, so a migration is applied exactly once or not at all. Version
//! numbers are sparse on purpose: they match the schema versions other
//! clients of the same cache format already shipped.
//!
//! [`Database`]: crate::Database

pub mod v002_initial;
pub mod v004_created_at_soft_delete;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version. Bump this and add a new migration module whenever
/// the schema changes.
pub const CURRENT_VERSION: u32 = 4;

/// One forward-only schema step.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    /// Creates the version's tables and index layout and rewrites existing
    /// rows into the new shape. Must tolerate being re-run.
    pub up: fn(&Connection) -> rusqlite::Result<()>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 2,
        name: "v002_initial",
        up: v002_initial::up,
    },
    Migration {
        version: 4,
        name: "v004_created_at_soft_delete",
        up: v004_created_at_soft_delete::up,
    },
];

/// Run all pending migrations against the open connection.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    migrate_to(conn, CURRENT_VERSION)
}

/// Apply pending migrations up to and including `target`.
pub fn migrate_to(conn: &mut Connection, target: u32) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::info!(
        current_version = current,
        target_version = target,
        "checking database migrations"
    );

    if current > CURRENT_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: current,
            supported: CURRENT_VERSION,
        });
    }

    for migration in MIGRATIONS
        .iter()
        .filter(|m| m.version > current && m.version <= target)
    {
        tracing::info!(version = migration.version, "applying migration {}", migration.name);

        let tx = conn.transaction()?;
        (migration.up)(&tx).map_err(|e| StoreError::Migration {
            version: migration.version,
            reason: e.to_string(),
        })?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
    }

    Ok(())
}

/// Whether `table` currently has a column named `column`.
pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use rusqlite::params;

    use super::*;

    fn v2_connection() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to(&mut conn, 2).unwrap();
        conn
    }

    fn insert_v2_message(conn: &Connection, id: &str, timestamp: &str) {
        conn.execute(
            "INSERT INTO messages (id, text, sender_id, sender_name, channel_id, timestamp, status, is_local, attachments)
             VALUES (?1, 'hi', 'u1', 'Al', 'c1', ?2, 'sent', 0, '[]')",
            params![id, timestamp],
        )
        .unwrap();
    }

    #[test]
    fn fresh_database_reaches_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
        assert!(column_exists(&conn, "messages", "created_at").unwrap());
        assert!(!column_exists(&conn, "messages", "timestamp").unwrap());
        assert!(column_exists(&conn, "users", "deleted_at").unwrap());
    }

    #[test]
    fn v2_timestamp_moves_to_created_at() {
        let mut conn = v2_connection();
        insert_v2_message(&conn, "a", "2025-03-30T10:00:00.000Z");
        insert_v2_message(&conn, "b", "2025-03-30T11:00:00.000Z");

        run_migrations(&mut conn).unwrap();

        let mut stmt = conn
            .prepare("SELECT id, created_at, deleted_at FROM messages ORDER BY id")
            .unwrap();
        let rows: Vec<(String, String, Option<String>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();

        assert_eq!(
            rows,
            vec![
                ("a".into(), "2025-03-30T10:00:00.000Z".into(), None),
                ("b".into(), "2025-03-30T11:00:00.000Z".into(), None),
            ]
        );
        assert!(!column_exists(&conn, "messages", "timestamp").unwrap());
    }

    #[test]
    fn migrations_apply_once() {
        let mut conn = v2_connection();
        insert_v2_message(&conn, "a", "2025-03-30T10:00:00.000Z");

        run_migrations(&mut conn).unwrap();
        conn.execute("UPDATE messages SET created_at = '2030-01-01T00:00:00Z'", [])
            .unwrap();

        // Already at v4: nothing may be rewritten again.
        run_migrations(&mut conn).unwrap();
        let created_at: String = conn
            .query_row("SELECT created_at FROM messages WHERE id = 'a'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(created_at, "2030-01-01T00:00:00Z");
    }

    #[test]
    fn upgrade_step_is_idempotent() {
        let conn = v2_connection();
        insert_v2_message(&conn, "a", "2025-03-30T10:00:00.000Z");

        v004_created_at_soft_delete::up(&conn).unwrap();
        v004_created_at_soft_delete::up(&conn).unwrap();

        let created_at: String = conn
            .query_row("SELECT created_at FROM messages WHERE id = 'a'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(created_at, "2025-03-30T10:00:00.000Z");
    }

    #[test]
    fn newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_VERSION + 1)
            .unwrap();

        assert!(matches!(
            run_migrations(&mut conn),
            Err(StoreError::SchemaTooNew { .. })
        ));
    }
}
