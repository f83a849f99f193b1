//! Wire codec for relay payloads.
//!
//! Every frame is one JSON object. Two encodings exist side by side:
//!
//! - **legacy** (untagged): presence frames carry a `type` key
//!   (`join`/`leave`); any object without `type` is a chat message.
//! - **tagged**: a `kind` key (`presence`/`chat`) names the variant
//!   explicitly.
//!
//! Decoding accepts both. Encoding defaults to the legacy form so clients
//! that only understand it keep working.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceKind {
    Join,
    Leave,
}

/// A peer joined or left the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    #[serde(rename = "type")]
    pub kind: PresenceKind,
    pub user_id: String,
}

impl PresenceEvent {
    pub fn join(user_id: impl Into<String>) -> Self {
        Self {
            kind: PresenceKind::Join,
            user_id: user_id.into(),
        }
    }

    pub fn leave(user_id: impl Into<String>) -> Self {
        Self {
            kind: PresenceKind::Leave,
            user_id: user_id.into(),
        }
    }
}

/// Every event that travels over a relay channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WireEvent {
    Presence(PresenceEvent),
    Chat { message: Message },
}

/// Which encoding outgoing frames use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Legacy,
    Tagged,
}

impl FromStr for WireFormat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "tagged" => Ok(Self::Tagged),
            other => Err(ProtocolError::UnknownWireFormat(other.to_string())),
        }
    }
}

impl WireEvent {
    pub fn chat(message: Message) -> Self {
        Self::Chat { message }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self, format: WireFormat) -> Result<String, ProtocolError> {
        let text = match (format, self) {
            (WireFormat::Tagged, event) => serde_json::to_string(event)?,
            (WireFormat::Legacy, WireEvent::Presence(presence)) => {
                serde_json::to_string(presence)?
            }
            (WireFormat::Legacy, WireEvent::Chat { message }) => serde_json::to_string(message)?,
        };
        Ok(text)
    }

    /// Parse a JSON text frame in either encoding.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;

        if object.contains_key("kind") {
            return Ok(serde_json::from_value(value)?);
        }

        match object.get("type") {
            None => Ok(Self::Chat {
                message: serde_json::from_value(value)?,
            }),
            Some(kind) => match kind.as_str() {
                Some("join") | Some("leave") => Ok(Self::Presence(serde_json::from_value(value)?)),
                _ => Err(ProtocolError::UnknownEventType(kind.to_string())),
            },
        }
    }
}
