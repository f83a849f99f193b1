use thiserror::Error;

use parley_shared::{MessageStatus, ProtocolError};

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No record with this id.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A record with this id already exists.
    #[error("Duplicate id: {0}")]
    Constraint(String),

    /// The requested status change would move a message backwards.
    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: MessageStatus,
        to: MessageStatus,
    },

    /// Migration failure.
    #[error("Migration to v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// The database was written by a newer build.
    #[error("Database schema v{found} is newer than supported v{supported}")]
    SchemaTooNew { found: u32, supported: u32 },

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// Stored JSON column could not be (de)serialized.
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored enum column holds an unknown value.
    #[error("Invalid stored value: {0}")]
    Value(#[from] ProtocolError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
