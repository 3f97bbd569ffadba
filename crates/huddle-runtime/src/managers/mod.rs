//! Stateful managers for the Huddle runtime
//!
//! This module contains the manager structs that own the transport, the room
//! subscriptions and message dispatch of a session.

pub mod connection;
pub mod dispatch;
pub mod rooms;

pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, LifecycleEvent};
pub use dispatch::{DispatchEngine, DispatchOutcome, DispatchTarget, StagedSend};
pub use rooms::{ListenerId, RoomListener, RoomRegistry, RoomSubscription};
