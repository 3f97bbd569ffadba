//! Chat list aggregation
//!
//! Private rooms and groups are loaded independently, kept in their own raw
//! collections and merged by key into one ranked feed. Ranking is by
//! descending last-message time; entries without a time sort last and ties
//! keep the order in which entries were first loaded.

use core::cmp::Ordering;
use serde::{Deserialize, Serialize};

use crate::protocol::{GroupRecord, RoomSummaryRecord};
use crate::types::{ConversationKey, GroupId, RoomId, RoomKind, Timestamp};

// ----------------------------------------------------------------------------
// Conversation Summary
// ----------------------------------------------------------------------------

/// One entry of the chat list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub key: ConversationKey,
    pub room: Option<RoomId>,
    pub title: String,
    pub last_message: Option<String>,
    pub last_message_time: Option<Timestamp>,
    pub unread: u32,
    /// Position in load order, used as the ranking tie-break
    pub load_order: u64,
}

impl ConversationSummary {
    /// Summary with no history yet
    pub fn empty(key: ConversationKey, room: Option<RoomId>, title: impl Into<String>) -> Self {
        Self {
            key,
            room,
            title: title.into(),
            last_message: None,
            last_message_time: None,
            unread: 0,
            load_order: 0,
        }
    }

    pub fn from_room_record(record: &RoomSummaryRecord) -> Self {
        let title = record
            .counterpart_name
            .clone()
            .unwrap_or_else(|| record.counterpart.to_string());
        Self {
            key: ConversationKey::Private(record.counterpart.clone()),
            room: Some(record.room.clone()),
            title,
            last_message: record.last_message.clone(),
            last_message_time: record.last_message_time,
            unread: 0,
            load_order: 0,
        }
    }

    pub fn from_group_record(record: &GroupRecord) -> Self {
        Self {
            key: record.key(),
            room: Some(record.room.clone()),
            title: record.name.clone(),
            last_message: record.last_message.clone(),
            last_message_time: record.last_message_time,
            unread: 0,
            load_order: 0,
        }
    }

    pub fn has_history(&self) -> bool {
        self.last_message.is_some() || self.last_message_time.is_some()
    }

    /// Adopt newer activity; older activity never regresses the summary
    fn patch_activity(&mut self, text: &str, time: Timestamp) -> bool {
        match self.last_message_time {
            Some(current) if time < current => false,
            _ => {
                self.last_message = Some(text.to_string());
                self.last_message_time = Some(time);
                true
            }
        }
    }
}

/// Feed ranking order
pub fn rank(a: &ConversationSummary, b: &ConversationSummary) -> Ordering {
    match (a.last_message_time, b.last_message_time) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then(a.load_order.cmp(&b.load_order))
}

// ----------------------------------------------------------------------------
// Chat Feed
// ----------------------------------------------------------------------------

/// Merged, ranked chat list plus the raw per-kind collections
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatFeed {
    pub(crate) private: Vec<ConversationSummary>,
    pub(crate) groups: Vec<ConversationSummary>,
    pub(crate) merged: Vec<ConversationSummary>,
    next_order: u64,
}

impl ChatFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both collections at once
    pub fn load(&mut self, rooms: &[RoomSummaryRecord], groups: &[GroupRecord]) {
        self.replace_private(rooms);
        self.replace_groups(groups);
    }

    /// Replace the private collection with a fresh listing
    pub fn replace_private(&mut self, records: &[RoomSummaryRecord]) {
        let fresh = records
            .iter()
            .map(ConversationSummary::from_room_record)
            .collect();
        let previous = core::mem::take(&mut self.private);
        self.private = self.carry_over(&previous, fresh);
        self.rebuild();
    }

    /// Replace the group collection with a fresh listing
    pub fn replace_groups(&mut self, records: &[GroupRecord]) {
        let fresh = records
            .iter()
            .map(ConversationSummary::from_group_record)
            .collect();
        let previous = core::mem::take(&mut self.groups);
        self.groups = self.carry_over(&previous, fresh);
        self.rebuild();
    }

    /// Keep load order, unread counts and newer activity of known entries
    fn carry_over(
        &mut self,
        previous: &[ConversationSummary],
        fresh: Vec<ConversationSummary>,
    ) -> Vec<ConversationSummary> {
        fresh
            .into_iter()
            .map(|mut summary| {
                match previous.iter().find(|p| p.key == summary.key) {
                    Some(known) => {
                        summary.load_order = known.load_order;
                        summary.unread = known.unread;
                        if known.last_message_time > summary.last_message_time {
                            summary.last_message = known.last_message.clone();
                            summary.last_message_time = known.last_message_time;
                        }
                    }
                    None => summary.load_order = self.take_order(),
                }
                summary
            })
            .collect()
    }

    fn take_order(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    /// Recompute the merged feed from the raw collections
    fn rebuild(&mut self) {
        let mut merged: Vec<ConversationSummary> = self
            .private
            .iter()
            .chain(self.groups.iter())
            .filter(|s| s.has_history())
            .cloned()
            .collect();
        // Stable sort keeps load order for equal keys
        merged.sort_by(rank);
        self.merged = merged;
    }

    pub(crate) fn collection_mut(&mut self, kind: RoomKind) -> &mut Vec<ConversationSummary> {
        match kind {
            RoomKind::Private => &mut self.private,
            RoomKind::Group => &mut self.groups,
        }
    }

    /// Insert a summary unless its key is already known; `true` if inserted
    pub fn insert_if_absent(&mut self, mut summary: ConversationSummary) -> bool {
        if self.get(&summary.key).is_some() {
            return false;
        }
        summary.load_order = self.take_order();
        self.collection_mut(summary.key.kind()).push(summary);
        self.rebuild();
        true
    }

    /// Record activity for a conversation, inserting it if new.
    ///
    /// Returns `false` when the activity is older than what the summary
    /// already shows.
    pub fn apply_activity(&mut self, key: &ConversationKey, text: &str, time: Timestamp) -> bool {
        let patched = match self
            .collection_mut(key.kind())
            .iter_mut()
            .find(|s| s.key == *key)
        {
            Some(summary) => summary.patch_activity(text, time),
            None => {
                let title = match key {
                    ConversationKey::Private(user) => user.to_string(),
                    ConversationKey::Group(group) => group.to_string(),
                };
                let mut summary = ConversationSummary::empty(key.clone(), None, title);
                summary.patch_activity(text, time);
                summary.load_order = self.take_order();
                self.collection_mut(key.kind()).push(summary);
                true
            }
        };
        if patched {
            self.rebuild();
        }
        patched
    }

    /// Attach the transport room to a known conversation
    pub fn set_room(&mut self, key: &ConversationKey, room: RoomId) -> bool {
        let Some(summary) = self
            .collection_mut(key.kind())
            .iter_mut()
            .find(|s| s.key == *key)
        else {
            return false;
        };
        summary.room = Some(room);
        self.rebuild();
        true
    }

    pub fn rename_group(&mut self, group: &GroupId, name: &str) -> bool {
        let key = ConversationKey::Group(group.clone());
        let Some(summary) = self.groups.iter_mut().find(|s| s.key == key) else {
            return false;
        };
        summary.title = name.to_string();
        self.rebuild();
        true
    }

    pub fn remove(&mut self, key: &ConversationKey) -> Option<ConversationSummary> {
        let collection = self.collection_mut(key.kind());
        let index = collection.iter().position(|s| s.key == *key)?;
        let removed = collection.remove(index);
        self.rebuild();
        Some(removed)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Ranked feed of conversations with history
    pub fn merged(&self) -> &[ConversationSummary] {
        &self.merged
    }

    pub fn private(&self) -> &[ConversationSummary] {
        &self.private
    }

    pub fn groups(&self) -> &[ConversationSummary] {
        &self.groups
    }

    pub fn get(&self, key: &ConversationKey) -> Option<&ConversationSummary> {
        match key.kind() {
            RoomKind::Private => &self.private,
            RoomKind::Group => &self.groups,
        }
        .iter()
        .find(|s| s.key == *key)
    }

    pub fn find_by_room(&self, room: &RoomId) -> Option<&ConversationSummary> {
        self.private
            .iter()
            .chain(self.groups.iter())
            .find(|s| s.room.as_ref() == Some(room))
    }

    /// Position of a conversation in the merged feed
    pub fn rank_of(&self, key: &ConversationKey) -> Option<usize> {
        self.merged.iter().position(|s| s.key == *key)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
