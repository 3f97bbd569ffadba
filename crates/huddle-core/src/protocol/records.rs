//! Records exchanged with the durable API

use serde::{Deserialize, Serialize};

use crate::types::{
    ClientMessageId, ConversationKey, GroupId, MessageKind, RoomId, ServerMessageId, Timestamp,
    UserId,
};

/// A persisted message as returned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: ServerMessageId,
    pub room: RoomId,
    pub sender: UserId,
    pub body: String,
    #[serde(default)]
    pub kind: MessageKind,
    pub created_at: Timestamp,
    /// Echo of the idempotency key sent with the write, when the store keeps it
    #[serde(default)]
    pub client_id: Option<ClientMessageId>,
}

/// Body of a create-message request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub client_id: ClientMessageId,
    pub room: RoomId,
    pub sender: UserId,
    pub body: String,
    pub kind: MessageKind,
    /// Present for group sends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,
}

/// Private room summary as listed by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummaryRecord {
    pub room: RoomId,
    pub counterpart: UserId,
    #[serde(default)]
    pub counterpart_name: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_time: Option<Timestamp>,
}

/// Group as listed by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    /// Transport room carrying the group's live traffic
    pub room: RoomId,
    pub name: String,
    #[serde(default)]
    pub members: Vec<UserId>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_time: Option<Timestamp>,
}

impl GroupRecord {
    pub fn key(&self) -> ConversationKey {
        ConversationKey::Group(self.id.clone())
    }
}

/// Body of a create-group request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
    pub owner: UserId,
    pub members: Vec<UserId>,
}

/// Partial update of a group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// History page request, page 0 being the newest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub index: u32,
    pub size: u32,
}

impl Page {
    pub fn newest(size: u32) -> Self {
        Self { index: 0, size }
    }

    pub fn next(self) -> Self {
        Self {
            index: self.index + 1,
            ..self
        }
    }
}
