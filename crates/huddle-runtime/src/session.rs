//! Chat session composition root
//!
//! A [`ChatSession`] lives from login to logout and owns every component of the
//! delivery core: connection manager, room registry, dispatch engine, session
//! store and the durable API handle. Nothing is global; a second session is a
//! second value.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use huddle_core::{
    ChatFeed, ConversationKey, ConversationSummary, GroupId, GroupRecord, GroupUpdate,
    HuddleConfig, HuddleError, HuddleResult, MessageKind, MessageRecord, NewGroup, Notification,
    Page, RoomId, Transcript, UserId,
};

use crate::api::{DurableApi, HttpDurableApi};
use crate::managers::connection::{ConnectionManager, ConnectionStatus};
use crate::managers::dispatch::{DispatchEngine, DispatchOutcome, DispatchTarget};
use crate::managers::rooms::{RoomRegistry, RoomSubscription};
use crate::store::SessionStore;
use crate::transport::{TransportConnector, WebSocketConnector};

/// Handle to a conversation opened in the session
#[derive(Debug, Clone)]
pub struct OpenConversation {
    pub key: ConversationKey,
    pub room: RoomId,
    pub transcript: watch::Receiver<Arc<Transcript>>,
}

/// One authenticated chat session
pub struct ChatSession {
    identity: UserId,
    credential: String,
    config: HuddleConfig,
    api: Arc<dyn DurableApi>,
    store: Arc<SessionStore>,
    connection: ConnectionManager,
    rooms: RoomRegistry,
    dispatch: DispatchEngine,
    groups: DashMap<GroupId, GroupRecord>,
    subscriptions: DashMap<RoomId, RoomSubscription>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("identity", &self.identity)
            .field("connection", &self.connection)
            .field("groups", &self.groups.len())
            .finish()
    }
}

impl ChatSession {
    /// Assemble a session from its collaborators
    pub fn new(
        config: HuddleConfig,
        identity: UserId,
        credential: impl Into<String>,
        connector: Arc<dyn TransportConnector>,
        api: Arc<dyn DurableApi>,
    ) -> HuddleResult<Self> {
        config.validate()?;
        let store = Arc::new(SessionStore::new());
        let connection = ConnectionManager::new(config.connection.clone(), connector);
        let rooms = RoomRegistry::new(connection.clone());
        let dispatch = DispatchEngine::new(
            identity.clone(),
            config.dispatch.clone(),
            api.clone(),
            store.clone(),
            connection.clone(),
        );

        Ok(Self {
            identity,
            credential: credential.into(),
            config,
            api,
            store,
            connection,
            rooms,
            dispatch,
            groups: DashMap::new(),
            subscriptions: DashMap::new(),
        })
    }

    /// Session backed by the WebSocket transport and the HTTP durable API
    pub fn with_defaults(
        config: HuddleConfig,
        identity: UserId,
        credential: impl Into<String>,
    ) -> HuddleResult<Self> {
        let credential = credential.into();
        let api = HttpDurableApi::new(&config.api, credential.clone())?;
        Self::new(
            config,
            identity,
            credential,
            Arc::new(WebSocketConnector::new()),
            Arc::new(api),
        )
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn dispatch(&self) -> &DispatchEngine {
        &self.dispatch
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn feed(&self) -> Arc<ChatFeed> {
        self.store.feed()
    }

    pub fn watch_feed(&self) -> watch::Receiver<Arc<ChatFeed>> {
        self.store.watch_feed()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.connection.subscribe_notifications()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start routing and connect the transport
    pub async fn start(&self) -> HuddleResult<()> {
        info!("Starting session for {}", self.identity);
        self.rooms.start();
        self.connection
            .connect(self.identity.clone(), self.credential.clone())
            .await?;
        Ok(())
    }

    /// Disconnect and release every room listener
    pub fn shutdown(&self) {
        info!("Shutting down session for {}", self.identity);
        self.subscriptions.clear();
        self.store.close_conversation();
        self.rooms.shutdown();
        self.connection.disconnect();
    }

    // ------------------------------------------------------------------------
    // Feed
    // ------------------------------------------------------------------------

    /// Load private rooms and groups concurrently.
    ///
    /// Each listing is applied as soon as it succeeds; the first failure is
    /// returned after both completed.
    pub async fn load_feed(&self) -> HuddleResult<Arc<ChatFeed>> {
        let (rooms, groups) = futures::join!(
            self.api.list_rooms(&self.identity),
            self.api.list_groups(&self.identity)
        );

        let mut first_error = None;
        match rooms {
            Ok(rooms) => {
                for room in &rooms {
                    self.attach_room(&room.room);
                }
                self.store.update_feed(|feed| feed.replace_private(&rooms));
            }
            Err(e) => {
                warn!("Failed to load private rooms: {}", e);
                first_error = Some(e);
            }
        }
        match groups {
            Ok(groups) => {
                for group in &groups {
                    self.attach_room(&group.room);
                    self.groups.insert(group.id.clone(), group.clone());
                }
                self.store.update_feed(|feed| feed.replace_groups(&groups));
            }
            Err(e) => {
                warn!("Failed to load groups: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(self.store.feed()),
        }
    }

    // ------------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------------

    /// Join `room` and route its live traffic into the store
    fn attach_room(&self, room: &RoomId) {
        self.rooms.join(room);
        if self.subscriptions.contains_key(room) {
            return;
        }
        let store = self.store.clone();
        let identity = self.identity.clone();
        let subscription = self.rooms.register_listener(room, move |received| {
            // Our own sends reconcile through dispatch
            if received.sender == identity {
                return;
            }
            let key = store.resolve_key(received, &identity);
            if let Some(change) = store.ingest_remote(&key, received) {
                debug!("Message in {} for {}: {:?}", received.room, key, change);
            }
        });
        self.subscriptions.insert(room.clone(), subscription);
    }

    fn detach_room(&self, room: &RoomId) {
        self.subscriptions.remove(room);
        self.rooms.leave(room);
    }

    /// Room of a private conversation, created on first use
    async fn private_room(&self, counterpart: &UserId) -> HuddleResult<RoomId> {
        let key = ConversationKey::Private(counterpart.clone());
        if let Some(room) = self.store.feed().get(&key).and_then(|s| s.room.clone()) {
            return Ok(room);
        }
        let room = self
            .api
            .create_private_room(&self.identity, counterpart)
            .await?;
        self.store.update_feed(|feed| {
            feed.insert_if_absent(ConversationSummary::empty(
                key.clone(),
                Some(room.clone()),
                counterpart.to_string(),
            ));
            feed.set_room(&key, room.clone());
        });
        self.attach_room(&room);
        Ok(room)
    }

    fn group_room(&self, group: &GroupId) -> HuddleResult<RoomId> {
        self.groups
            .get(group)
            .map(|record| record.room.clone())
            .ok_or_else(|| HuddleError::UnknownConversation {
                key: ConversationKey::Group(group.clone()),
            })
    }

    fn room_of(&self, key: &ConversationKey) -> HuddleResult<RoomId> {
        match key {
            ConversationKey::Group(group) => self.group_room(group),
            ConversationKey::Private(_) => self
                .store
                .feed()
                .get(key)
                .and_then(|s| s.room.clone())
                .ok_or_else(|| HuddleError::UnknownConversation { key: key.clone() }),
        }
    }

    async fn fetch_page(&self, key: &ConversationKey, room: &RoomId, page: Page) -> HuddleResult<Vec<MessageRecord>> {
        let records = match key {
            ConversationKey::Private(_) => self.api.list_messages(room, page).await?,
            ConversationKey::Group(group) => self.api.list_group_messages(group, page).await?,
        };
        Ok(records)
    }

    /// Mark `key` open, then load its newest history page.
    ///
    /// The conversation stays open when the history read fails; live traffic
    /// keeps flowing into the transcript without counting as unread.
    async fn open(&self, key: ConversationKey, room: RoomId) -> HuddleResult<OpenConversation> {
        self.store.open_conversation(&key);
        self.attach_room(&room);
        self.spawn_mark_read(room.clone());

        let page = Page::newest(self.config.api.page_size);
        let records = self.fetch_page(&key, &room, page).await.map_err(|e| {
            warn!("Failed to load history of {}: {}", key, e);
            e
        })?;
        let added = self
            .store
            .update_transcript(&room, |t| t.merge_history(&records));
        debug!("Opened {} with {} history messages", key, added);

        Ok(OpenConversation {
            transcript: self.store.watch_transcript(&room),
            key,
            room,
        })
    }

    /// Open the private conversation with `counterpart`
    pub async fn open_private(&self, counterpart: &UserId) -> HuddleResult<OpenConversation> {
        let room = self.private_room(counterpart).await?;
        self.open(ConversationKey::Private(counterpart.clone()), room)
            .await
    }

    pub async fn open_group(&self, group: &GroupId) -> HuddleResult<OpenConversation> {
        let room = self.group_room(group)?;
        self.open(ConversationKey::Group(group.clone()), room).await
    }

    /// Merge an older history page into a conversation; returns messages added
    pub async fn load_older(&self, key: &ConversationKey, page: Page) -> HuddleResult<usize> {
        let room = self.room_of(key)?;
        let records = self.fetch_page(key, &room, page).await?;
        Ok(self
            .store
            .update_transcript(&room, |t| t.merge_history(&records)))
    }

    pub fn close_conversation(&self) -> Option<ConversationKey> {
        self.store.close_conversation()
    }

    fn spawn_mark_read(&self, room: RoomId) {
        let api = self.api.clone();
        let user = self.identity.clone();
        tokio::spawn(async move {
            if let Err(e) = api.mark_read(&room, &user).await {
                warn!("Failed to mark {} read: {}", room, e);
            }
        });
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    pub async fn send_private(&self, counterpart: &UserId, body: &str) -> HuddleResult<DispatchOutcome> {
        if body.trim().is_empty() {
            return Err(HuddleError::EmptyBody);
        }
        let room = self.private_room(counterpart).await?;
        let target = DispatchTarget::Private {
            counterpart: counterpart.clone(),
            room,
        };
        self.dispatch.send(target, body, MessageKind::Text).await
    }

    pub async fn send_group(&self, group: &GroupId, body: &str) -> HuddleResult<DispatchOutcome> {
        let target = DispatchTarget::Group {
            group: group.clone(),
            room: self.group_room(group)?,
        };
        self.dispatch.send(target, body, MessageKind::Text).await
    }

    // ------------------------------------------------------------------------
    // Group Management
    // ------------------------------------------------------------------------

    pub async fn create_group(&self, name: &str, members: Vec<UserId>) -> HuddleResult<GroupRecord> {
        let request = NewGroup {
            name: name.to_string(),
            owner: self.identity.clone(),
            members,
        };
        let group = self.api.create_group(&request).await?;
        info!("Created group {} ({})", group.name, group.id);

        self.groups.insert(group.id.clone(), group.clone());
        self.store.update_feed(|feed| {
            feed.insert_if_absent(ConversationSummary::from_group_record(&group));
        });
        self.attach_room(&group.room);
        Ok(group)
    }

    pub async fn rename_group(&self, group: &GroupId, name: &str) -> HuddleResult<GroupRecord> {
        let update = GroupUpdate {
            name: Some(name.to_string()),
        };
        let record = self.api.update_group(group, &update).await?;
        self.groups.insert(group.clone(), record.clone());
        self.store
            .update_feed(|feed| feed.rename_group(group, &record.name));
        Ok(record)
    }

    pub async fn delete_group(&self, group: &GroupId) -> HuddleResult<()> {
        let room = self.group_room(group)?;
        self.api.delete_group(group).await?;
        info!("Deleted group {}", group);

        let key = ConversationKey::Group(group.clone());
        if self.store.open_conversation_key().as_ref() == Some(&key) {
            self.store.close_conversation();
        }
        self.groups.remove(group);
        self.store.update_feed(|feed| feed.remove(&key));
        self.detach_room(&room);
        self.store.remove_transcript(&room);
        Ok(())
    }

    pub async fn add_member(&self, group: &GroupId, user: &UserId) -> HuddleResult<()> {
        self.api.add_member(group, user).await?;
        if let Some(mut record) = self.groups.get_mut(group) {
            if !record.members.contains(user) {
                record.members.push(user.clone());
            }
        }
        Ok(())
    }

    pub async fn remove_member(&self, group: &GroupId, user: &UserId) -> HuddleResult<()> {
        self.api.remove_member(group, user).await?;
        if *user == self.identity {
            // Removing ourselves is leaving the group
            let key = ConversationKey::Group(group.clone());
            if let Some((_, record)) = self.groups.remove(group) {
                self.detach_room(&record.room);
            }
            self.store.update_feed(|feed| feed.remove(&key));
        } else if let Some(mut record) = self.groups.get_mut(group) {
            record.members.retain(|member| member != user);
        }
        Ok(())
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.rooms.shutdown();
        self.connection.disconnect();
    }
}
