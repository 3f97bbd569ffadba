//! Transport frame encoding and decoding
//!
//! Every frame is a JSON object `{"type": <tag>, "payload": {...}}`. Outbound
//! frames are fully typed. Inbound frames are decoded in two steps so that an
//! unrecognized tag can be told apart from a malformed frame: the first is
//! dropped quietly, the second is a [`ProtocolDecodeError`].

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolDecodeError;
use crate::types::{GroupId, MessageKind, RoomId, ServerMessageId, Timestamp, UserId};

// ----------------------------------------------------------------------------
// Tags
// ----------------------------------------------------------------------------

pub const TAG_LOGIN: &str = "login";
pub const TAG_JOIN_ROOM: &str = "join-room";
pub const TAG_LEAVE_ROOM: &str = "leave-room";
pub const TAG_ROOM_MESSAGE: &str = "room-message";
pub const TAG_WELCOME: &str = "welcome";
pub const TAG_MESSAGE_RECEIVED: &str = "message-received";
pub const TAG_NOTIFICATION_RECEIVED: &str = "notification-received";

// ----------------------------------------------------------------------------
// Outbound Frames
// ----------------------------------------------------------------------------

/// Frames sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum OutboundFrame {
    Login {
        identity: UserId,
    },
    JoinRoom {
        room: RoomId,
    },
    LeaveRoom {
        room: RoomId,
    },
    /// Best-effort live preview; the durable write is the source of truth
    RoomMessage {
        room: RoomId,
        message: String,
        identity: UserId,
    },
}

impl OutboundFrame {
    pub fn tag(&self) -> &'static str {
        match self {
            OutboundFrame::Login { .. } => TAG_LOGIN,
            OutboundFrame::JoinRoom { .. } => TAG_JOIN_ROOM,
            OutboundFrame::LeaveRoom { .. } => TAG_LEAVE_ROOM,
            OutboundFrame::RoomMessage { .. } => TAG_ROOM_MESSAGE,
        }
    }

    /// Encode as a JSON text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ----------------------------------------------------------------------------
// Inbound Frames
// ----------------------------------------------------------------------------

/// Handshake acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A message pushed live by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub room: RoomId,
    pub sender: UserId,
    pub message: String,
    pub timestamp: Timestamp,
    /// Durable id, when the server already persisted the message
    #[serde(default)]
    pub id: Option<ServerMessageId>,
    #[serde(default)]
    pub kind: MessageKind,
    /// Set for group rooms
    #[serde(default)]
    pub group: Option<GroupId>,
}

impl ReceivedMessage {
    /// Durable id, or a stable id derived from the frame contents
    pub fn server_id(&self) -> ServerMessageId {
        self.id.clone().unwrap_or_else(|| {
            ServerMessageId::derived(&self.room, &self.sender, self.timestamp)
        })
    }
}

/// Out-of-band notification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Frames received from the server
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Welcome(Welcome),
    MessageReceived(ReceivedMessage),
    NotificationReceived(Notification),
}

impl InboundFrame {
    pub fn tag(&self) -> &'static str {
        match self {
            InboundFrame::Welcome(_) => TAG_WELCOME,
            InboundFrame::MessageReceived(_) => TAG_MESSAGE_RECEIVED,
            InboundFrame::NotificationReceived(_) => TAG_NOTIFICATION_RECEIVED,
        }
    }
}

/// Result of decoding one inbound text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frame(InboundFrame),
    /// Well-formed frame with a tag this client does not handle
    Unrecognized { tag: String },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    payload: serde_json::Value,
}

fn payload<T: serde::de::DeserializeOwned>(
    tag: &str,
    value: serde_json::Value,
) -> Result<T, ProtocolDecodeError> {
    // Tags without payload send null; treat it as an empty object
    let value = if value.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        value
    };
    serde_json::from_value(value).map_err(|e| ProtocolDecodeError::InvalidPayload {
        tag: tag.to_string(),
        reason: e.to_string(),
    })
}

/// Decode one inbound text frame
pub fn decode_inbound(text: &str) -> Result<Decoded, ProtocolDecodeError> {
    let raw: RawFrame = serde_json::from_str(text).map_err(|e| ProtocolDecodeError::Malformed {
        reason: e.to_string(),
    })?;

    let frame = match raw.tag.as_str() {
        TAG_WELCOME => InboundFrame::Welcome(payload(&raw.tag, raw.payload)?),
        TAG_MESSAGE_RECEIVED => InboundFrame::MessageReceived(payload(&raw.tag, raw.payload)?),
        TAG_NOTIFICATION_RECEIVED => {
            InboundFrame::NotificationReceived(payload(&raw.tag, raw.payload)?)
        }
        _ => return Ok(Decoded::Unrecognized { tag: raw.tag }),
    };
    Ok(Decoded::Frame(frame))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
