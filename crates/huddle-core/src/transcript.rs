//! Room transcripts and the optimistic-echo reconciliation state machine
//!
//! A send appears in the transcript immediately as a `Pending` echo. Every
//! later outcome (retrying, confirmed, fallback, withdrawn) is applied to that
//! same entry through [`Transcript::reconcile`], keyed by the client-local id,
//! so a message is never shown twice and never silently disappears.

use core::fmt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::{MessageRecord, ReceivedMessage};
use crate::types::{ClientMessageId, MessageKind, RoomId, ServerMessageId, Timestamp, UserId};

// ----------------------------------------------------------------------------
// Delivery State
// ----------------------------------------------------------------------------

/// Delivery state of a transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DeliveryState {
    /// Awaiting confirmation; `retries` counts retries already scheduled
    Pending { retries: u32 },
    /// Persisted by the store
    Confirmed { server_id: ServerMessageId },
    /// Kept visible after retries ran out
    Fallback { annotation: String },
}

impl DeliveryState {
    pub fn name(&self) -> &'static str {
        match self {
            DeliveryState::Pending { .. } => "pending",
            DeliveryState::Confirmed { .. } => "confirmed",
            DeliveryState::Fallback { .. } => "fallback",
        }
    }
}

/// Requested change to a single message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Retrying { retries: u32 },
    Confirmed(MessageRecord),
    Fallback { annotation: String },
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Retrying { retries } => write!(f, "retrying({})", retries),
            Transition::Confirmed(record) => write!(f, "confirmed({})", record.id),
            Transition::Fallback { .. } => write!(f, "fallback"),
        }
    }
}

/// Transcript reconciliation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscriptError {
    #[error("Cannot apply {transition} to a {state} message")]
    InvalidTransition { state: &'static str, transition: String },

    #[error("Message {client_id} is not in room {room}")]
    UnknownMessage {
        room: RoomId,
        client_id: ClientMessageId,
    },
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub client_id: ClientMessageId,
    pub room: RoomId,
    pub sender: UserId,
    pub body: String,
    pub kind: MessageKind,
    pub created_at: Timestamp,
    pub state: DeliveryState,
}

impl Message {
    /// Optimistic echo of a local send
    pub fn echo(room: RoomId, sender: UserId, body: String, kind: MessageKind) -> Self {
        Self {
            client_id: ClientMessageId::generate(),
            room,
            sender,
            body,
            kind,
            created_at: Timestamp::now(),
            state: DeliveryState::Pending { retries: 0 },
        }
    }

    /// Confirmed entry built from a stored record
    pub fn from_record(record: &MessageRecord) -> Self {
        Self {
            client_id: record.client_id.unwrap_or_else(ClientMessageId::generate),
            room: record.room.clone(),
            sender: record.sender.clone(),
            body: record.body.clone(),
            kind: record.kind,
            created_at: record.created_at,
            state: DeliveryState::Confirmed {
                server_id: record.id.clone(),
            },
        }
    }

    /// Confirmed entry built from a live frame
    pub fn from_received(received: &ReceivedMessage) -> Self {
        Self {
            client_id: ClientMessageId::generate(),
            room: received.room.clone(),
            sender: received.sender.clone(),
            body: received.message.clone(),
            kind: received.kind,
            created_at: received.timestamp,
            state: DeliveryState::Confirmed {
                server_id: received.server_id(),
            },
        }
    }

    pub fn server_id(&self) -> Option<&ServerMessageId> {
        match &self.state {
            DeliveryState::Confirmed { server_id } => Some(server_id),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, DeliveryState::Pending { .. })
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.state, DeliveryState::Fallback { .. })
    }

    /// Apply a transition, refusing ones that would lose information
    pub fn apply(&mut self, transition: Transition) -> Result<(), TranscriptError> {
        let invalid = |state: &DeliveryState, transition: &Transition| {
            TranscriptError::InvalidTransition {
                state: state.name(),
                transition: transition.to_string(),
            }
        };

        match (&self.state, transition) {
            (DeliveryState::Pending { .. }, Transition::Retrying { retries }) => {
                self.state = DeliveryState::Pending { retries };
            }
            // A fallback may still be confirmed by a later reload
            (
                DeliveryState::Pending { .. } | DeliveryState::Fallback { .. },
                Transition::Confirmed(record),
            ) => {
                self.created_at = record.created_at;
                self.state = DeliveryState::Confirmed {
                    server_id: record.id,
                };
            }
            (DeliveryState::Confirmed { server_id }, Transition::Confirmed(record))
                if *server_id == record.id => {}
            (
                DeliveryState::Pending { .. } | DeliveryState::Fallback { .. },
                Transition::Fallback { annotation },
            ) => {
                self.state = DeliveryState::Fallback { annotation };
            }
            (state, transition) => return Err(invalid(state, &transition)),
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Transcript
// ----------------------------------------------------------------------------

/// Reconciliation step applied to an entry keyed by client id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconcile {
    Apply(Transition),
    /// Remove the echo; the send had no side effect
    Withdraw,
}

/// Result of a reconciliation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    Updated(Message),
    Withdrawn(Message),
}

/// Ordered messages of one room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    room: RoomId,
    entries: Vec<Message>,
}

impl Transcript {
    pub fn new(room: RoomId) -> Self {
        Self {
            room,
            entries: Vec::new(),
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, client_id: &ClientMessageId) -> Option<&Message> {
        self.entries.iter().find(|m| m.client_id == *client_id)
    }

    fn position(&self, client_id: &ClientMessageId) -> Option<usize> {
        self.entries.iter().position(|m| m.client_id == *client_id)
    }

    pub fn contains_server_id(&self, server_id: &ServerMessageId) -> bool {
        self.entries
            .iter()
            .any(|m| m.server_id() == Some(server_id))
    }

    /// Append an optimistic echo
    pub fn push_echo(&mut self, message: Message) {
        self.entries.push(message);
    }

    /// Append a remote message in arrival order; `false` if already present
    pub fn append_remote(&mut self, message: Message) -> bool {
        if let Some(server_id) = message.server_id() {
            if self.contains_server_id(server_id) {
                return false;
            }
        }
        self.entries.push(message);
        true
    }

    /// Apply one reconciliation step to the entry with `client_id`
    pub fn reconcile(
        &mut self,
        client_id: &ClientMessageId,
        step: Reconcile,
    ) -> Result<Reconciled, TranscriptError> {
        let index = self
            .position(client_id)
            .ok_or_else(|| TranscriptError::UnknownMessage {
                room: self.room.clone(),
                client_id: *client_id,
            })?;

        match step {
            Reconcile::Withdraw => Ok(Reconciled::Withdrawn(self.entries.remove(index))),
            Reconcile::Apply(transition) => {
                let confirmed_id = match &transition {
                    Transition::Confirmed(record) => Some(record.id.clone()),
                    _ => None,
                };
                self.entries[index].apply(transition)?;

                // The live broadcast of our own write may have landed first
                if let Some(server_id) = confirmed_id {
                    let own = *client_id;
                    let before = self.entries.len();
                    self.entries.retain(|m| {
                        m.client_id == own || m.server_id() != Some(&server_id)
                    });
                    if self.entries.len() < before {
                        debug!("Collapsed live duplicate of {} in {}", server_id, self.room);
                    }
                }

                let updated = self
                    .get(client_id)
                    .cloned()
                    .ok_or_else(|| TranscriptError::UnknownMessage {
                        room: self.room.clone(),
                        client_id: *client_id,
                    })?;
                Ok(Reconciled::Updated(updated))
            }
        }
    }

    /// Merge a history page (any order) into the transcript.
    ///
    /// Records already present by server id are skipped. Confirmed entries are
    /// then stably ordered by creation time; pending and fallback entries
    /// follow them in send order. Returns the number of records added.
    pub fn merge_history(&mut self, records: &[MessageRecord]) -> usize {
        let mut added = 0;
        for record in records {
            if record.room != self.room || self.contains_server_id(&record.id) {
                continue;
            }
            self.entries.push(Message::from_record(record));
            added += 1;
        }
        if added > 0 {
            // Unconfirmed echoes carry the local clock; they keep send order at the tail
            let (mut settled, unsettled): (Vec<Message>, Vec<Message>) =
                core::mem::take(&mut self.entries)
                    .into_iter()
                    .partition(|m| matches!(m.state, DeliveryState::Confirmed { .. }));
            settled.sort_by_key(|m| m.created_at);
            settled.extend(unsettled);
            self.entries = settled;
        }
        added
    }

    /// Explicit user deletion
    pub fn remove(&mut self, client_id: &ClientMessageId) -> Option<Message> {
        let index = self.position(client_id)?;
        Some(self.entries.remove(index))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
