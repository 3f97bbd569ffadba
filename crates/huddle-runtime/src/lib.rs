//! Huddle Runtime Engine
//!
//! This crate contains the I/O side of the Huddle messaging delivery core:
//! - `ConnectionManager`: persistent transport lifecycle with reconnection
//! - `RoomRegistry`: room joins and per-room listener fan-out
//! - `DispatchEngine`: optimistic sends with classified retries
//! - `SessionStore`: published transcript, feed and unread snapshots
//! - `ChatSession`: the composition root tying them to a durable API
//!
//! `huddle-core` provides the pure state these components drive.

pub mod api;
pub mod managers;
pub mod session;
pub mod store;
pub mod transport;

pub use api::{ApiResult, DurableApi, HttpDurableApi};
pub use managers::*;
pub use session::{ChatSession, OpenConversation};
pub use store::SessionStore;
pub use transport::{
    CloseKind, LinkCommand, TransportConnector, TransportLink, TransportSignal, WebSocketConnector,
};

// Re-export core types for convenience
pub use huddle_core::{
    ApiError, ConversationKey, DeliveryState, FailureClass, GroupId, HuddleConfig, HuddleError,
    HuddleResult, Message, MessageKind, RoomId, Transcript, UserId,
};
