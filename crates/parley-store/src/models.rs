//! Store-side companions to the shared domain types.
//!
//! The records themselves ([`Message`], [`User`]) live in `parley-shared` so
//! the wire codec and the cache agree on one shape; this module adds the
//! partial-update and bulk-selection types the store operations take.

use parley_shared::{Attachment, MessageStatus};

pub use parley_shared::{Message, User, UserStatus};

/// Partial update of a message. `None` leaves the column untouched.
///
/// `id` and `created_at` are immutable and `deleted_at` is only changed
/// through the soft-delete helpers, so none of them appear here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub text: Option<String>,
    pub sender_name: Option<String>,
    pub status: Option<MessageStatus>,
    pub is_local: Option<bool>,
    pub attachments: Option<Vec<Attachment>>,
}

impl MessagePatch {
    pub fn status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Selects messages for bulk soft-deletion. Set fields are AND-ed; an empty
/// filter matches every visible message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub sender_id: Option<String>,
    pub channel_id: Option<String>,
}

impl MessageFilter {
    pub fn from_sender(sender_id: impl Into<String>) -> Self {
        Self {
            sender_id: Some(sender_id.into()),
            ..Self::default()
        }
    }

    /// Whether a message (already loaded in memory) matches this filter.
    pub fn matches(&self, message: &Message) -> bool {
        self.sender_id
            .as_deref()
            .map_or(true, |s| s == message.sender_id)
            && self
                .channel_id
                .as_deref()
                .map_or(true, |c| c == message.channel_id)
    }
}
