//! Published conversation state of a session
//!
//! Transcripts and the chat feed are held as `watch` channels of immutable
//! `Arc` snapshots. Every mutation reads the current snapshot, clones it,
//! applies a keyed patch and publishes the result, so a reader never sees a
//! half-applied change.

use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use huddle_core::{
    ChatFeed, ConversationKey, Message, ReceivedMessage, RoomId, Transcript, UnreadChange,
    UnreadLedger, UserId,
};

type TranscriptChannel = Arc<watch::Sender<Arc<Transcript>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Snapshot store for transcripts, feed and unread state
pub struct SessionStore {
    transcripts: DashMap<RoomId, TranscriptChannel>,
    feed: watch::Sender<Arc<ChatFeed>>,
    unread: Mutex<UnreadLedger>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("rooms", &self.transcripts.len())
            .field("feed_entries", &self.feed.borrow().merged().len())
            .finish()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_ledger(UnreadLedger::new())
    }

    pub fn with_ledger(ledger: UnreadLedger) -> Self {
        Self {
            transcripts: DashMap::new(),
            feed: watch::channel(Arc::new(ChatFeed::new())).0,
            unread: Mutex::new(ledger),
        }
    }

    // ------------------------------------------------------------------------
    // Transcripts
    // ------------------------------------------------------------------------

    fn channel(&self, room: &RoomId) -> TranscriptChannel {
        self.transcripts
            .entry(room.clone())
            .or_insert_with(|| Arc::new(watch::channel(Arc::new(Transcript::new(room.clone()))).0))
            .clone()
    }

    /// Current transcript snapshot of `room`
    pub fn transcript(&self, room: &RoomId) -> Arc<Transcript> {
        self.channel(room).borrow().clone()
    }

    pub fn watch_transcript(&self, room: &RoomId) -> watch::Receiver<Arc<Transcript>> {
        self.channel(room).subscribe()
    }

    /// Clone, patch and publish the transcript of `room`
    pub fn update_transcript<R>(&self, room: &RoomId, patch: impl FnOnce(&mut Transcript) -> R) -> R {
        let channel = self.channel(room);
        let mut result = None;
        channel.send_modify(|current| {
            let mut next = Transcript::clone(current);
            result = Some(patch(&mut next));
            *current = Arc::new(next);
        });
        match result {
            Some(result) => result,
            // send_modify always runs the closure
            None => unreachable!("transcript patch did not run"),
        }
    }

    pub fn remove_transcript(&self, room: &RoomId) {
        self.transcripts.remove(room);
    }

    // ------------------------------------------------------------------------
    // Feed
    // ------------------------------------------------------------------------

    pub fn feed(&self) -> Arc<ChatFeed> {
        self.feed.borrow().clone()
    }

    pub fn watch_feed(&self) -> watch::Receiver<Arc<ChatFeed>> {
        self.feed.subscribe()
    }

    /// Clone, patch and publish the chat feed
    pub fn update_feed<R>(&self, patch: impl FnOnce(&mut ChatFeed) -> R) -> R {
        let mut result = None;
        self.feed.send_modify(|current| {
            let mut next = ChatFeed::clone(current);
            result = Some(patch(&mut next));
            *current = Arc::new(next);
        });
        match result {
            Some(result) => result,
            None => unreachable!("feed patch did not run"),
        }
    }

    /// Patch the feed together with the unread ledger in one publish
    pub fn update_unread<R>(&self, patch: impl FnOnce(&mut UnreadLedger, &mut ChatFeed) -> R) -> R {
        let mut ledger = lock(&self.unread);
        self.update_feed(|feed| patch(&mut ledger, feed))
    }

    // ------------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------------

    /// Mark `key` open and clear its unread counter
    pub fn open_conversation(&self, key: &ConversationKey) {
        self.update_unread(|ledger, feed| {
            ledger.open(key.clone());
            feed.reset_unread(key);
        });
    }

    pub fn close_conversation(&self) -> Option<ConversationKey> {
        lock(&self.unread).close()
    }

    pub fn open_conversation_key(&self) -> Option<ConversationKey> {
        lock(&self.unread).open_conversation().cloned()
    }

    /// Apply a remote message to transcript, feed and unread counters.
    ///
    /// Returns `None` when the message was already in the transcript.
    pub fn ingest_remote(&self, key: &ConversationKey, received: &ReceivedMessage) -> Option<UnreadChange> {
        let message = Message::from_received(received);
        let server_id = received.server_id();
        if !self.update_transcript(&received.room, |t| t.append_remote(message)) {
            debug!("Duplicate message {} in room {}", server_id, received.room);
            return None;
        }
        let change = self.update_unread(|ledger, feed| {
            feed.apply_activity(key, &received.message, received.timestamp);
            if feed.get(key).is_some_and(|s| s.room.is_none()) {
                feed.set_room(key, received.room.clone());
            }
            ledger.record_remote(feed, key, &server_id)
        });
        Some(change)
    }

    /// Key that owns `room`, falling back to the frame's own hints
    pub fn resolve_key(&self, received: &ReceivedMessage, identity: &UserId) -> ConversationKey {
        if let Some(summary) = self.feed.borrow().find_by_room(&received.room) {
            return summary.key.clone();
        }
        match &received.group {
            Some(group) => ConversationKey::Group(group.clone()),
            None if received.sender != *identity => ConversationKey::Private(received.sender.clone()),
            None => ConversationKey::Private(identity.clone()),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::{GroupId, MessageKind, ServerMessageId, Timestamp};

    fn received(room: &str, sender: &str, id: &str, at: u64) -> ReceivedMessage {
        ReceivedMessage {
            room: RoomId::from(room),
            sender: UserId::from(sender),
            message: format!("from {}", sender),
            timestamp: Timestamp::new(at),
            id: Some(ServerMessageId::from(id)),
            kind: MessageKind::Text,
            group: None,
        }
    }

    #[test]
    fn test_snapshots_are_immutable() {
        let store = SessionStore::new();
        let room = RoomId::from("r1");
        let before = store.transcript(&room);

        let key = ConversationKey::Private(UserId::from("bob"));
        store.ingest_remote(&key, &received("r1", "bob", "m1", 10));

        assert!(before.is_empty());
        assert_eq!(store.transcript(&room).len(), 1);
    }

    #[test]
    fn test_ingest_counts_and_dedupes() {
        let store = SessionStore::new();
        let key = ConversationKey::Private(UserId::from("bob"));

        let message = received("r1", "bob", "m1", 10);
        assert_eq!(
            store.ingest_remote(&key, &message),
            Some(UnreadChange::Incremented(1))
        );
        assert_eq!(store.ingest_remote(&key, &message), None);

        let feed = store.feed();
        assert_eq!(feed.unread(&key), 1);
        assert_eq!(feed.get(&key).unwrap().room, Some(RoomId::from("r1")));
    }

    #[test]
    fn test_open_resets_and_suppresses_unread() {
        let store = SessionStore::new();
        let key = ConversationKey::Private(UserId::from("bob"));
        for (i, id) in ["m1", "m2", "m3"].iter().enumerate() {
            store.ingest_remote(&key, &received("r1", "bob", id, i as u64));
        }
        assert_eq!(store.feed().unread(&key), 3);

        store.open_conversation(&key);
        let feed = store.feed();
        assert_eq!(feed.private()[0].unread, 0);
        assert_eq!(feed.merged()[0].unread, 0);

        assert_eq!(
            store.ingest_remote(&key, &received("r1", "bob", "m4", 9)),
            Some(UnreadChange::SkippedOpen)
        );
    }

    #[test]
    fn test_resolve_key_prefers_feed() {
        let store = SessionStore::new();
        let me = UserId::from("alice");
        let key = ConversationKey::Group(GroupId::from("ops"));
        store.update_feed(|feed| {
            feed.apply_activity(&key, "hi", Timestamp::new(1));
            feed.set_room(&key, RoomId::from("g-room"));
        });

        let mut message = received("g-room", "bob", "m1", 2);
        assert_eq!(store.resolve_key(&message, &me), key);

        message.room = RoomId::from("unknown");
        assert_eq!(
            store.resolve_key(&message, &me),
            ConversationKey::Private(UserId::from("bob"))
        );
    }
}
