use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::MessageError;

pub const CONTENT_UPDATE: &str = "content_update";
pub const CURSOR_POSITION: &str = "cursor_position";
pub const USER_JOINED: &str = "user_joined";
pub const USER_LEFT: &str = "user_left";
pub const USER_COUNT_UPDATE: &str = "user_count_update";

/// Raw wire envelope: `{ "type": <kind>, "payload": <object> }`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// Identifies the client edit a content update was produced from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditOrigin {
    pub client: Uuid,
    pub seq: u64,
}

/// Full-document snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ContentUpdate {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<EditOrigin>,
}

impl ContentUpdate {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            version: None,
            origin: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CursorPosition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub position: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPresence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserCount {
    pub count: u64,
}

/// A message exchanged over the collaboration connection.
///
/// Every variant is a self-contained snapshot or event. Kinds this client does
/// not know are kept as [`Message::Unrecognized`] instead of failing to parse.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub enum Message {
    ContentUpdate(ContentUpdate),
    CursorPosition(CursorPosition),
    UserJoined(UserPresence),
    UserLeft(UserPresence),
    UserCountUpdate(UserCount),
    Unrecognized { kind: String, payload: Value },
}

impl Message {
    pub fn content(content: impl Into<String>) -> Self {
        Message::ContentUpdate(ContentUpdate::new(content))
    }

    pub fn kind(&self) -> &str {
        match self {
            Message::ContentUpdate(_) => CONTENT_UPDATE,
            Message::CursorPosition(_) => CURSOR_POSITION,
            Message::UserJoined(_) => USER_JOINED,
            Message::UserLeft(_) => USER_LEFT,
            Message::UserCountUpdate(_) => USER_COUNT_UPDATE,
            Message::Unrecognized { kind, .. } => kind,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl TryFrom<Envelope> for Message {
    type Error = serde_json::Error;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let Envelope { kind, payload } = envelope;
        let message = match kind.as_str() {
            CONTENT_UPDATE => Message::ContentUpdate(serde_json::from_value(payload)?),
            CURSOR_POSITION => Message::CursorPosition(serde_json::from_value(payload)?),
            USER_JOINED => Message::UserJoined(presence_from(payload)?),
            USER_LEFT => Message::UserLeft(presence_from(payload)?),
            USER_COUNT_UPDATE => Message::UserCountUpdate(serde_json::from_value(payload)?),
            _ => Message::Unrecognized { kind, payload },
        };
        Ok(message)
    }
}

// Join/leave events are informational, so an absent payload is tolerated.
fn presence_from(payload: Value) -> Result<UserPresence, serde_json::Error> {
    if payload.is_null() {
        return Ok(UserPresence::default());
    }
    serde_json::from_value(payload)
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        let kind = message.kind().to_string();
        let payload = match message {
            Message::ContentUpdate(p) => serde_json::to_value(p),
            Message::CursorPosition(p) => serde_json::to_value(p),
            Message::UserJoined(p) | Message::UserLeft(p) => serde_json::to_value(p),
            Message::UserCountUpdate(p) => serde_json::to_value(p),
            Message::Unrecognized { payload, .. } => Ok(payload),
        };
        Envelope {
            kind,
            payload: payload.unwrap_or(Value::Null),
        }
    }
}
