//! Wire protocol: transport frames and durable API records

pub mod frames;
pub mod records;

pub use frames::{
    decode_inbound, Decoded, InboundFrame, Notification, OutboundFrame, ReceivedMessage, Welcome,
};
pub use records::{
    GroupRecord, GroupUpdate, MessageDraft, MessageRecord, NewGroup, Page, RoomSummaryRecord,
};
