//! Message dispatch engine
//!
//! A send is staged synchronously (validated, echoed into the transcript as
//! `Pending`) and then delivered to the durable store. Each failure is
//! classified and handled by the matching [`RetryPolicy`](huddle_core::RetryPolicy):
//!
//! - transient network or rejected: the echo is withdrawn and the error surfaced
//! - server error: retried with linear backoff, then kept as a fallback
//! - write conflict: retried once after a longer cooldown, then kept as a fallback
//!
//! Server and conflict budgets are independent, so a conflict that follows a
//! server error still gets its retry.
//!
//! Every attempt carries the same client id, and every outcome is applied to
//! the single echo through [`Transcript::reconcile`](huddle_core::Transcript::reconcile).

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use huddle_core::{
    retry_classified, ApiError, ClientMessageId, ConversationKey, DispatchConfig, FailureClass,
    GroupId, HuddleError, HuddleResult, Message, MessageDraft, MessageKind, MessageRecord,
    OutboundFrame, Reconcile, Reconciled, RetryError, RoomId, Transition, UserId,
};

use super::connection::ConnectionManager;
use crate::api::DurableApi;
use crate::store::SessionStore;

// ----------------------------------------------------------------------------
// Dispatch Types
// ----------------------------------------------------------------------------

/// Conversation a message is sent to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTarget {
    Private { counterpart: UserId, room: RoomId },
    Group { group: GroupId, room: RoomId },
}

impl DispatchTarget {
    pub fn key(&self) -> ConversationKey {
        match self {
            DispatchTarget::Private { counterpart, .. } => {
                ConversationKey::Private(counterpart.clone())
            }
            DispatchTarget::Group { group, .. } => ConversationKey::Group(group.clone()),
        }
    }

    pub fn room(&self) -> &RoomId {
        match self {
            DispatchTarget::Private { room, .. } | DispatchTarget::Group { room, .. } => room,
        }
    }
}

/// Final outcome of a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Persisted; the echo now carries the server id
    Confirmed(Message),
    /// Retries ran out; the echo stays visible with an annotation
    Fallback { message: Message, error: ApiError },
    /// Nothing was persisted; the echo was removed
    Withdrawn { message: Message, error: ApiError },
}

impl DispatchOutcome {
    pub fn message(&self) -> &Message {
        match self {
            DispatchOutcome::Confirmed(message)
            | DispatchOutcome::Fallback { message, .. }
            | DispatchOutcome::Withdrawn { message, .. } => message,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, DispatchOutcome::Confirmed(_))
    }
}

/// A send that has been echoed but not yet delivered
#[derive(Debug, Clone)]
pub struct StagedSend {
    pub target: DispatchTarget,
    pub echo: Message,
}

impl StagedSend {
    pub fn client_id(&self) -> ClientMessageId {
        self.echo.client_id
    }
}

// ----------------------------------------------------------------------------
// Dispatch Engine
// ----------------------------------------------------------------------------

/// Sends messages with optimistic echo and classified retries
#[derive(Clone)]
pub struct DispatchEngine {
    identity: UserId,
    config: DispatchConfig,
    api: Arc<dyn DurableApi>,
    store: Arc<SessionStore>,
    connection: ConnectionManager,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("identity", &self.identity)
            .field("config", &self.config)
            .finish()
    }
}

impl DispatchEngine {
    pub fn new(
        identity: UserId,
        config: DispatchConfig,
        api: Arc<dyn DurableApi>,
        store: Arc<SessionStore>,
        connection: ConnectionManager,
    ) -> Self {
        Self {
            identity,
            config,
            api,
            store,
            connection,
        }
    }

    /// Send and wait for the final outcome
    pub async fn send(
        &self,
        target: DispatchTarget,
        body: &str,
        kind: MessageKind,
    ) -> HuddleResult<DispatchOutcome> {
        let staged = self.stage(target, body, kind)?;
        Ok(self.deliver(staged).await)
    }

    /// Stage now and deliver on a spawned task
    ///
    /// The task is independent of any listener, so detaching listeners never
    /// cancels an in-flight send.
    pub fn spawn_send(
        &self,
        target: DispatchTarget,
        body: &str,
        kind: MessageKind,
    ) -> HuddleResult<(ClientMessageId, JoinHandle<DispatchOutcome>)> {
        let staged = self.stage(target, body, kind)?;
        let client_id = staged.client_id();
        let engine = self.clone();
        let handle = tokio::spawn(async move { engine.deliver(staged).await });
        Ok((client_id, handle))
    }

    /// Validate and echo a send into its room transcript
    pub fn stage(
        &self,
        target: DispatchTarget,
        body: &str,
        kind: MessageKind,
    ) -> HuddleResult<StagedSend> {
        if body.trim().is_empty() {
            return Err(HuddleError::EmptyBody);
        }
        let echo = Message::echo(
            target.room().clone(),
            self.identity.clone(),
            body.to_string(),
            kind,
        );
        debug!("Staged {} in room {}", echo.client_id, echo.room);
        self.store
            .update_transcript(target.room(), |t| t.push_echo(echo.clone()));
        Ok(StagedSend { target, echo })
    }

    /// Deliver a staged send until it is confirmed, withdrawn or falls back
    pub async fn deliver(&self, staged: StagedSend) -> DispatchOutcome {
        let StagedSend { target, echo } = staged;
        let draft = MessageDraft {
            client_id: echo.client_id,
            room: echo.room.clone(),
            sender: echo.sender.clone(),
            body: echo.body.clone(),
            kind: echo.kind,
            group: match &target {
                DispatchTarget::Group { group, .. } => Some(group.clone()),
                DispatchTarget::Private { .. } => None,
            },
        };

        let result = retry_classified(
            |attempt| {
                let api = self.api.clone();
                let draft = draft.clone();
                let target = target.clone();
                async move {
                    debug!("Delivering {} (attempt {})", draft.client_id, attempt);
                    match &target {
                        DispatchTarget::Private { .. } => api.create_message(&draft).await,
                        DispatchTarget::Group { group, .. } => {
                            api.create_group_message(group, &draft).await
                        }
                    }
                }
            },
            |error: &ApiError| {
                let class = error.class();
                self.config.policy_for(class).map(|policy| (class, policy))
            },
            |error, notice| {
                warn!(
                    "Delivery of {} failed ({}), retry {} in {:?}",
                    echo.client_id, error, notice.failed_attempt, notice.delay
                );
                self.apply(
                    &echo,
                    Reconcile::Apply(Transition::Retrying {
                        retries: notice.failed_attempt,
                    }),
                );
            },
        )
        .await;

        match result {
            Ok(record) => self.confirm(&target, echo, record),
            Err(failure) => self.fail(echo, failure),
        }
    }

    fn confirm(&self, target: &DispatchTarget, echo: Message, record: MessageRecord) -> DispatchOutcome {
        info!("Message {} confirmed as {}", echo.client_id, record.id);
        let created_at = record.created_at;
        let message = self
            .apply(&echo, Reconcile::Apply(Transition::Confirmed(record)))
            .unwrap_or(echo);

        let key = target.key();
        self.store.update_unread(|_, feed| {
            feed.apply_activity(&key, &message.body, created_at);
            feed.set_room(&key, target.room().clone());
            feed.reset_unread(&key);
        });

        if self.connection.is_connected() {
            self.connection.send(&OutboundFrame::RoomMessage {
                room: target.room().clone(),
                message: message.body.clone(),
                identity: self.identity.clone(),
            });
        }
        DispatchOutcome::Confirmed(message)
    }

    fn fail(&self, echo: Message, failure: RetryError<ApiError>) -> DispatchOutcome {
        let attempts = failure.attempts();
        let error = failure.into_error();

        // A later transient failure cannot undo an earlier ambiguous attempt
        let annotation = match error.class() {
            FailureClass::TransientNetwork | FailureClass::Rejected if attempts == 1 => {
                warn!("Message {} withdrawn: {}", echo.client_id, error);
                let message = self.apply(&echo, Reconcile::Withdraw).unwrap_or(echo);
                return DispatchOutcome::Withdrawn { message, error };
            }
            FailureClass::Server => self.config.fallback_annotation.clone(),
            _ => self.config.conflict_annotation.clone(),
        };

        error!(
            "Message {} not confirmed after {} attempts: {}",
            echo.client_id, attempts, error
        );
        let message = self
            .apply(&echo, Reconcile::Apply(Transition::Fallback { annotation }))
            .unwrap_or(echo);
        DispatchOutcome::Fallback { message, error }
    }

    fn apply(&self, echo: &Message, step: Reconcile) -> Option<Message> {
        match self
            .store
            .update_transcript(&echo.room, |t| t.reconcile(&echo.client_id, step))
        {
            Ok(Reconciled::Updated(message)) | Ok(Reconciled::Withdrawn(message)) => Some(message),
            Err(e) => {
                error!("Failed to reconcile {}: {}", echo.client_id, e);
                None
            }
        }
    }
}
