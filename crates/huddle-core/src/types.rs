//! Core types for the Huddle messaging core
//!
//! Identifiers are newtypes so that user, group and room keys can never be
//! confused with one another, even though all of them are strings on the wire.

use core::fmt;
use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// String Identifiers
// ----------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identity of a user (login identity and counterpart key for private rooms)
    UserId
);
string_id!(
    /// Identifier of a group conversation
    GroupId
);
string_id!(
    /// Identifier of a logical transport channel
    RoomId
);
string_id!(
    /// Identifier assigned by the durable store once a message is persisted
    ServerMessageId
);

impl ServerMessageId {
    /// Derive a stable id for a live frame that arrived without one
    pub fn derived(room: &RoomId, sender: &UserId, timestamp: Timestamp) -> Self {
        Self(format!("live:{}:{}:{}", room, sender, timestamp.as_millis()))
    }
}

// ----------------------------------------------------------------------------
// Client Message Identifier
// ----------------------------------------------------------------------------

/// Client-local message id, stable across retries of the same send
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientMessageId(Uuid);

impl ClientMessageId {
    /// Generate a fresh, session-unique id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ClientMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(other))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get milliseconds since Unix epoch
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Conversations
// ----------------------------------------------------------------------------

/// Kind of logical room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Private,
    Group,
}

/// Key of a conversation entity in the chat feed
///
/// Private conversations are keyed by the counterpart user, groups by group id.
/// The two keyspaces never collide even when the raw strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ConversationKey {
    Private(UserId),
    Group(GroupId),
}

impl ConversationKey {
    pub fn kind(&self) -> RoomKind {
        match self {
            ConversationKey::Private(_) => RoomKind::Private,
            ConversationKey::Group(_) => RoomKind::Group,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationKey::Private(user) => write!(f, "user:{}", user),
            ConversationKey::Group(group) => write!(f, "group:{}", group),
        }
    }
}

/// A logical channel messages are scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    /// Counterpart user for private rooms, group for group rooms
    pub key: ConversationKey,
}

impl Room {
    pub fn new(id: RoomId, key: ConversationKey) -> Self {
        Self { id, key }
    }

    pub fn kind(&self) -> RoomKind {
        self.key.kind()
    }
}

/// Content kind of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_keys_are_disjoint() {
        let user = ConversationKey::Private(UserId::from("42"));
        let group = ConversationKey::Group(GroupId::from("42"));

        assert_ne!(user, group);
        assert_eq!(user.to_string(), "user:42");
        assert_eq!(group.to_string(), "group:42");
        assert_eq!(group.kind(), RoomKind::Group);
    }

    #[test]
    fn test_client_ids_are_unique() {
        let a = ClientMessageId::generate();
        let b = ClientMessageId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_derived_server_id_is_stable() {
        let room = RoomId::from("r1");
        let sender = UserId::from("bob");
        let ts = Timestamp::new(1_000);

        assert_eq!(
            ServerMessageId::derived(&room, &sender, ts),
            ServerMessageId::derived(&room, &sender, ts)
        );
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&RoomId::from("r1")).unwrap();
        assert_eq!(json, "\"r1\"");

        let key: ConversationKey =
            serde_json::from_str(r#"{"kind":"group","id":"g7"}"#).unwrap();
        assert_eq!(key, ConversationKey::Group(GroupId::from("g7")));
    }
}
