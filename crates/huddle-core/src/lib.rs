//! Huddle Messaging Core
//!
//! This crate provides the domain types, error taxonomy, wire frames and the pure
//! conversation state of the Huddle real-time messaging delivery core: transcript
//! reconciliation, chat list aggregation, unread accounting and the bounded
//! retry utility used by message dispatch. It performs no I/O.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod errors;
pub mod feed;
pub mod protocol;
pub mod retry;
pub mod transcript;
pub mod types;
pub mod unread;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ApiConfig, ConnectionConfig, DispatchConfig, HuddleConfig, ReconnectConfig};
pub use errors::{
    ApiError, FailureClass, HuddleError, HuddleResult, ProtocolDecodeError, Result,
    TransportError,
};
pub use feed::{ChatFeed, ConversationSummary};
pub use protocol::{
    decode_inbound, Decoded, GroupRecord, GroupUpdate, InboundFrame, MessageDraft, MessageRecord,
    NewGroup, Notification, OutboundFrame, Page, ReceivedMessage, RoomSummaryRecord, Welcome,
};
pub use retry::{retry_classified, DelaySchedule, RetryError, RetryNotice, RetryPolicy};
pub use transcript::{
    DeliveryState, Message, Reconcile, Reconciled, Transcript, TranscriptError, Transition,
};
pub use types::{
    ClientMessageId, ConversationKey, GroupId, MessageKind, Room, RoomId, RoomKind,
    ServerMessageId, Timestamp, UserId,
};
pub use unread::{UnreadChange, UnreadLedger};
