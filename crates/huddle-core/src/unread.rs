//! Unread accounting
//!
//! Counters live on the feed summaries. [`UnreadLedger`] decides whether a
//! remote message counts: each message id is counted at most once, and
//! nothing is counted for the conversation the user has open.

use hashbrown::HashSet;
use std::collections::VecDeque;
use tracing::trace;

use crate::feed::ChatFeed;
use crate::types::{ConversationKey, ServerMessageId};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Number of message ids remembered for duplicate detection
pub const DEFAULT_UNREAD_WINDOW: usize = 4096;

// ----------------------------------------------------------------------------
// Feed Counters
// ----------------------------------------------------------------------------

impl ChatFeed {
    /// Increment the unread counter of `key` in every presentation
    pub fn increment_unread(&mut self, key: &ConversationKey) -> Option<u32> {
        let count = {
            let summary = self
                .collection_mut(key.kind())
                .iter_mut()
                .find(|s| s.key == *key)?;
            summary.unread = summary.unread.saturating_add(1);
            summary.unread
        };
        if let Some(merged) = self.merged.iter_mut().find(|s| s.key == *key) {
            merged.unread = count;
        }
        Some(count)
    }

    /// Zero the unread counter of `key` in every presentation
    pub fn reset_unread(&mut self, key: &ConversationKey) -> bool {
        let Some(summary) = self
            .collection_mut(key.kind())
            .iter_mut()
            .find(|s| s.key == *key)
        else {
            return false;
        };
        summary.unread = 0;
        if let Some(merged) = self.merged.iter_mut().find(|s| s.key == *key) {
            merged.unread = 0;
        }
        true
    }

    pub fn unread(&self, key: &ConversationKey) -> u32 {
        self.get(key).map(|s| s.unread).unwrap_or(0)
    }

    pub fn total_unread(&self) -> u32 {
        self.private
            .iter()
            .chain(self.groups.iter())
            .fold(0u32, |acc, s| acc.saturating_add(s.unread))
    }
}

// ----------------------------------------------------------------------------
// Unread Ledger
// ----------------------------------------------------------------------------

/// Outcome of recording one remote message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadChange {
    /// Counter incremented to the contained value
    Incremented(u32),
    /// Conversation is open; nothing counted
    SkippedOpen,
    /// Message id already counted
    Duplicate,
    /// Conversation has no summary in the feed
    Untracked,
}

/// Open-conversation marker plus a bounded window of counted message ids
#[derive(Debug, Clone)]
pub struct UnreadLedger {
    open: Option<ConversationKey>,
    seen: HashSet<ServerMessageId>,
    order: VecDeque<ServerMessageId>,
    capacity: usize,
}

impl Default for UnreadLedger {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_UNREAD_WINDOW)
    }
}

impl UnreadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            open: None,
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Mark `key` as the open conversation
    pub fn open(&mut self, key: ConversationKey) {
        self.open = Some(key);
    }

    pub fn close(&mut self) -> Option<ConversationKey> {
        self.open.take()
    }

    pub fn open_conversation(&self) -> Option<&ConversationKey> {
        self.open.as_ref()
    }

    pub fn is_open(&self, key: &ConversationKey) -> bool {
        self.open.as_ref() == Some(key)
    }

    /// Remember `id`; `false` if it was already known
    fn remember(&mut self, id: &ServerMessageId) -> bool {
        if !self.seen.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id.clone());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    /// Count a remote message against `key`
    pub fn record_remote(
        &mut self,
        feed: &mut ChatFeed,
        key: &ConversationKey,
        message_id: &ServerMessageId,
    ) -> UnreadChange {
        let change = if !self.remember(message_id) {
            UnreadChange::Duplicate
        } else if self.is_open(key) {
            UnreadChange::SkippedOpen
        } else {
            match feed.increment_unread(key) {
                Some(count) => UnreadChange::Incremented(count),
                None => UnreadChange::Untracked,
            }
        };
        trace!("Unread for {} after {}: {:?}", key, message_id, change);
        change
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Timestamp, UserId};

    fn feed_with(key: &ConversationKey) -> ChatFeed {
        let mut feed = ChatFeed::new();
        feed.apply_activity(key, "hello", Timestamp::new(1));
        feed
    }

    #[test]
    fn test_counts_each_message_once() {
        let key = ConversationKey::Private(UserId::from("bob"));
        let mut feed = feed_with(&key);
        let mut ledger = UnreadLedger::new();

        let id = ServerMessageId::from("m1");
        assert_eq!(
            ledger.record_remote(&mut feed, &key, &id),
            UnreadChange::Incremented(1)
        );
        assert_eq!(
            ledger.record_remote(&mut feed, &key, &id),
            UnreadChange::Duplicate
        );
        assert_eq!(feed.unread(&key), 1);
        assert_eq!(feed.merged()[0].unread, 1);
    }

    #[test]
    fn test_open_conversation_is_not_counted() {
        let key = ConversationKey::Private(UserId::from("bob"));
        let mut feed = feed_with(&key);
        let mut ledger = UnreadLedger::new();
        ledger.open(key.clone());

        assert_eq!(
            ledger.record_remote(&mut feed, &key, &ServerMessageId::from("m1")),
            UnreadChange::SkippedOpen
        );
        assert_eq!(feed.unread(&key), 0);

        ledger.close();
        assert_eq!(
            ledger.record_remote(&mut feed, &key, &ServerMessageId::from("m2")),
            UnreadChange::Incremented(1)
        );
    }

    #[test]
    fn test_reset_zeroes_all_presentations() {
        let key = ConversationKey::Private(UserId::from("bob"));
        let mut feed = feed_with(&key);
        let mut ledger = UnreadLedger::new();
        for i in 0..3 {
            ledger.record_remote(&mut feed, &key, &ServerMessageId::new(format!("m{}", i)));
        }
        assert_eq!(feed.total_unread(), 3);

        assert!(feed.reset_unread(&key));
        assert_eq!(feed.private()[0].unread, 0);
        assert_eq!(feed.merged()[0].unread, 0);
        assert_eq!(feed.total_unread(), 0);
    }

    #[test]
    fn test_window_is_bounded() {
        let key = ConversationKey::Private(UserId::from("bob"));
        let mut feed = feed_with(&key);
        let mut ledger = UnreadLedger::with_capacity(2);

        for id in ["a", "b", "c"] {
            ledger.record_remote(&mut feed, &key, &ServerMessageId::from(id));
        }
        // "a" fell out of the window
        assert_eq!(
            ledger.record_remote(&mut feed, &key, &ServerMessageId::from("a")),
            UnreadChange::Incremented(4)
        );
        assert_eq!(
            ledger.record_remote(&mut feed, &key, &ServerMessageId::from("c")),
            UnreadChange::Duplicate
        );
    }

    #[test]
    fn test_untracked_conversation() {
        let mut feed = ChatFeed::new();
        let mut ledger = UnreadLedger::new();
        let key = ConversationKey::Private(UserId::from("ghost"));
        assert_eq!(
            ledger.record_remote(&mut feed, &key, &ServerMessageId::from("m1")),
            UnreadChange::Untracked
        );
    }
}
