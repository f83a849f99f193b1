//! CRUD operations for [`Message`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, MessageFilter, MessagePatch};

const MESSAGE_COLUMNS: &str =
    "id, text, sender_id, sender_name, channel_id, created_at, status, is_local, deleted_at, attachments";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new message and return its id.
    ///
    /// Fails with [`StoreError::Constraint`] if a record with the same id
    /// already exists, whether visible or soft-deleted.
    pub fn add_message(&self, message: &Message) -> Result<String> {
        let attachments = serde_json::to_string(&message.attachments)?;

        let inserted = self.conn().execute(
            "INSERT INTO messages (id, text, sender_id, sender_name, channel_id, created_at, status, is_local, deleted_at, attachments)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                message.id,
                message.text,
                message.sender_id,
                message.sender_name,
                message.channel_id,
                message.created_at.to_rfc3339(),
                message.status.as_str(),
                message.is_local,
                message.deleted_at.map(|d| d.to_rfc3339()),
                attachments,
            ],
        );

        match inserted {
            Ok(_) => Ok(message.id.clone()),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::Constraint(message.id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single message by id, including soft-deleted ones.
    pub fn get_message(&self, id: &str) -> Result<Message> {
        self.find_message(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn find_message(&self, id: &str) -> Result<Option<Message>> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                RawMessage::from_row,
            )
            .optional()?
            .map(RawMessage::into_message)
            .transpose()
    }

    /// All messages without `deleted_at`, in insertion order.
    pub fn visible_messages(&self) -> Result<Vec<Message>> {
        self.select_messages(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE deleted_at IS NULL ORDER BY rowid ASC"),
            &[],
        )
    }

    /// Visible messages authored by `sender_id`, in insertion order.
    pub fn visible_messages_from(&self, sender_id: &str) -> Result<Vec<Message>> {
        self.select_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE deleted_at IS NULL AND sender_id = ?1
                 ORDER BY rowid ASC"
            ),
            &[sender_id],
        )
    }

    /// Number of stored message rows, soft-deleted ones included.
    pub fn message_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn select_messages(&self, sql: &str, args: &[&str]) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), RawMessage::from_row)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?.into_message()?);
        }
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Apply a partial update and return the updated record.
    ///
    /// A status change must respect the progression rule; a message that has
    /// reached `seen` cannot go back to `delivered`, for instance.
    pub fn update_message(&self, id: &str, patch: &MessagePatch) -> Result<Message> {
        let mut message = self.get_message(id)?;

        if let Some(status) = patch.status {
            if !message.status.can_advance_to(status) {
                return Err(StoreError::InvalidTransition {
                    id: id.to_string(),
                    from: message.status,
                    to: status,
                });
            }
            message.status = status;
        }
        if let Some(text) = &patch.text {
            message.text = text.clone();
        }
        if let Some(sender_name) = &patch.sender_name {
            message.sender_name = sender_name.clone();
        }
        if let Some(is_local) = patch.is_local {
            message.is_local = is_local;
        }
        if let Some(attachments) = &patch.attachments {
            message.attachments = attachments.clone();
        }

        self.conn().execute(
            "UPDATE messages
             SET text = ?2, sender_name = ?3, status = ?4, is_local = ?5, attachments = ?6
             WHERE id = ?1",
            params![
                id,
                message.text,
                message.sender_name,
                message.status.as_str(),
                message.is_local,
                serde_json::to_string(&message.attachments)?,
            ],
        )?;

        Ok(message)
    }

    // ------------------------------------------------------------------
    // Soft delete
    // ------------------------------------------------------------------

    /// Mark a message deleted. Returns `true` only for the call that actually
    /// set the marker; repeated calls keep the first timestamp.
    pub fn soft_delete_message(&self, id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Soft-delete every visible message matching `filter`. Returns how many
    /// rows were newly marked.
    pub fn soft_delete_messages_where(&self, filter: &MessageFilter) -> Result<usize> {
        let mut sql = String::from("UPDATE messages SET deleted_at = ? WHERE deleted_at IS NULL");
        let mut args = vec![Utc::now().to_rfc3339()];

        if let Some(sender_id) = &filter.sender_id {
            sql.push_str(" AND sender_id = ?");
            args.push(sender_id.clone());
        }
        if let Some(channel_id) = &filter.channel_id {
            sql.push_str(" AND channel_id = ?");
            args.push(channel_id.clone());
        }

        let affected = self.conn().execute(&sql, params_from_iter(args.iter()))?;
        tracing::debug!(?filter, affected, "bulk soft delete");
        Ok(affected)
    }

    /// Clear the soft-delete marker. Returns `true` if the message was hidden.
    pub fn restore_message(&self, id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET deleted_at = NULL WHERE id = ?1 AND deleted_at IS NOT NULL",
            params![id],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Column values as stored, before enum/JSON/timestamp decoding.
struct RawMessage {
    id: String,
    text: String,
    sender_id: String,
    sender_name: String,
    channel_id: String,
    created_at: String,
    status: String,
    is_local: bool,
    deleted_at: Option<String>,
    attachments: String,
}

impl RawMessage {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            text: row.get(1)?,
            sender_id: row.get(2)?,
            sender_name: row.get(3)?,
            channel_id: row.get(4)?,
            created_at: row.get(5)?,
            status: row.get(6)?,
            is_local: row.get(7)?,
            deleted_at: row.get(8)?,
            attachments: row.get(9)?,
        })
    }

    fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: self.id,
            text: self.text,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            channel_id: self.channel_id,
            created_at: parse_timestamp(&self.created_at)?,
            status: self.status.parse()?,
            is_local: self.is_local,
            deleted_at: self.deleted_at.as_deref().map(parse_timestamp).transpose()?,
            attachments: serde_json::from_str(&self.attachments)?,
        })
    }
}

pub(crate) fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}
