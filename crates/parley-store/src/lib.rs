//! # parley-store
//!
//! Durable local cache for the Parley client, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection`, runs the versioned schema migrations on open, and
//! provides typed helpers for messages and users. Nothing is ever hard
//! deleted: removal sets `deleted_at`, and every query used for rendering
//! skips such rows.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
