use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_TEXT_UNITS;
use crate::error::ProtocolError;

// ---------------------------------------------------------------------------
// Message status
// ---------------------------------------------------------------------------

/// Delivery status of a message.
///
/// `Sent < Delivered < Seen` is a one-way progression. `Error` can be entered
/// from any status and is never left by an automatic transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
    Error,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
            Self::Error => "error",
        }
    }

    fn rank(&self) -> Option<u8> {
        match self {
            Self::Sent => Some(0),
            Self::Delivered => Some(1),
            Self::Seen => Some(2),
            Self::Error => None,
        }
    }

    /// Whether moving from `self` to `next` respects the progression rule.
    /// Staying on the same status is allowed (a no-op).
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(current), Some(next)) => next >= current,
        }
    }

    /// Status given to a message received from the relay.
    pub fn inbound_default() -> Self {
        Self::Delivered
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "seen" => Ok(Self::Seen),
            "error" => Ok(Self::Error),
            other => Err(ProtocolError::InvalidValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A chat message as rendered, persisted and put on the wire.
///
/// Field names follow the camelCase JSON shape other clients on the relay
/// speak. Senders that still use the old `timestamp` key are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Opaque identifier. Older senders omit it; see [`Message::ensure_id`].
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(alias = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "MessageStatus::inbound_default")]
    pub status: MessageStatus,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Build a locally authored message from a draft, assigning a fresh id
    /// and creation time.
    pub fn from_draft(draft: MessageDraft) -> Self {
        Self {
            id: new_message_id(),
            text: draft.text,
            sender_id: draft.sender_id,
            sender_name: draft.sender_name,
            channel_id: draft.channel_id,
            created_at: Utc::now(),
            status: MessageStatus::Sent,
            is_local: true,
            deleted_at: None,
            attachments: draft.attachments,
        }
    }

    /// Assign a local id if the sender did not provide one.
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = new_message_id();
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.sender_id.is_empty() {
            return Err(ProtocolError::MissingSender);
        }
        validate_content(&self.text, &self.attachments)
    }
}

/// A message the local user wants to send; id and creation time are
/// assigned by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageDraft {
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub channel_id: String,
    pub attachments: Vec<Attachment>,
}

impl MessageDraft {
    pub fn text(
        text: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            channel_id: channel_id.into(),
            attachments: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.sender_id.is_empty() {
            return Err(ProtocolError::MissingSender);
        }
        validate_content(&self.text, &self.attachments)
    }
}

fn validate_content(text: &str, attachments: &[Attachment]) -> Result<(), ProtocolError> {
    let units = text.encode_utf16().count();
    if units > MAX_TEXT_UNITS {
        return Err(ProtocolError::TextTooLong {
            units,
            max: MAX_TEXT_UNITS,
        });
    }
    if text.trim().is_empty() && attachments.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    Ok(())
}

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Offline,
    Away,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Away => "away",
        }
    }
}

impl FromStr for UserStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "away" => Ok(Self::Away),
            other => Err(ProtocolError::InvalidValue {
                field: "user status",
                value: other.to_string(),
            }),
        }
    }
}

/// A known user, usually the local profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub status: UserStatus,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            username: username.into(),
            status: UserStatus::Online,
            last_seen: now,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}
