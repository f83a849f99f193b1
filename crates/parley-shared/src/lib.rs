//! Types and wire codec shared by the Parley client, store and relay.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{PresenceEvent, PresenceKind, WireEvent, WireFormat};
pub use types::{
    Attachment, AttachmentKind, Message, MessageDraft, MessageStatus, User, UserStatus,
};
