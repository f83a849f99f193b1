//! CRUD operations for [`User`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::parse_timestamp;
use crate::models::{User, UserStatus};

const USER_COLUMNS: &str = "id, username, status, last_seen, created_at, updated_at, deleted_at";

impl Database {
    /// Insert a user, or refresh username/status/last_seen of an existing one.
    /// `created_at` and `deleted_at` of an existing row are left alone.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, status, last_seen, created_at, updated_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                username   = excluded.username,
                status     = excluded.status,
                last_seen  = excluded.last_seen,
                updated_at = excluded.updated_at",
            params![
                user.id,
                user.username,
                user.status.as_str(),
                user.last_seen.to_rfc3339(),
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
                user.deleted_at.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Result<User> {
        let raw = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                RawUser::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        raw.into_user()
    }

    /// Users without `deleted_at`, ordered by username.
    pub fn visible_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY username ASC"
        ))?;
        let rows = stmt.query_map([], RawUser::from_row)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?.into_user()?);
        }
        Ok(users)
    }

    /// Record a presence change for a user; bumps `last_seen` and `updated_at`.
    pub fn set_user_status(&self, id: &str, status: UserStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let affected = self.conn().execute(
            "UPDATE users SET status = ?2, last_seen = ?3, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Mark a user deleted; idempotent.
    pub fn soft_delete_user(&self, id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let affected = self.conn().execute(
            "UPDATE users SET deleted_at = ?2, updated_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![id, now],
        )?;
        Ok(affected > 0)
    }
}

struct RawUser {
    id: String,
    username: String,
    status: String,
    last_seen: String,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl RawUser {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            status: row.get(2)?,
            last_seen: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            deleted_at: row.get(6)?,
        })
    }

    fn into_user(self) -> Result<User> {
        let deleted_at: Option<DateTime<Utc>> =
            self.deleted_at.as_deref().map(parse_timestamp).transpose()?;
        Ok(User {
            id: self.id,
            username: self.username,
            status: self.status.parse()?,
            last_seen: parse_timestamp(&self.last_seen)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            deleted_at,
        })
    }
}
