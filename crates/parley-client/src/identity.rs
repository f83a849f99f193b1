//! Local sender identity.
//!
//! The sender id is generated once and kept in `identity.json` inside the
//! data directory so it survives restarts. The display name is not stored
//! here; it comes from the configuration on every start.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use parley_shared::User;
use parley_store::Database;

use crate::error::Result;

pub const IDENTITY_FILE: &str = "identity.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityFile {
    sender_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub sender_id: String,
    pub username: String,
}

impl LocalIdentity {
    pub fn new(sender_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            username: username.into(),
        }
    }

    /// Read the identity from `data_dir`, creating it on first use.
    pub fn load_or_create(data_dir: &Path, username: &str) -> Result<Self> {
        let path = identity_path(data_dir);

        if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let stored: IdentityFile = serde_json::from_str(&raw)?;
            if !stored.sender_id.is_empty() {
                return Ok(Self::new(stored.sender_id, username));
            }
        }

        fs::create_dir_all(data_dir)?;
        let stored = IdentityFile {
            sender_id: Uuid::new_v4().to_string(),
        };
        fs::write(&path, serde_json::to_string_pretty(&stored)?)?;
        info!(sender_id = %stored.sender_id, path = %path.display(), "created local identity");

        Ok(Self::new(stored.sender_id, username))
    }

    /// Upsert the local profile into the `users` table.
    pub fn register(&self, db: &Database) -> Result<()> {
        db.upsert_user(&User::new(&self.sender_id, &self.username))?;
        Ok(())
    }
}

fn identity_path(data_dir: &Path) -> PathBuf {
    data_dir.join(IDENTITY_FILE)
}
