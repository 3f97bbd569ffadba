//! Property-based tests for chat feed ranking and unread accounting
//!
//! These tests verify ordering invariants of the merged feed and the
//! exactly-once behaviour of unread counters under arbitrary activity.

use huddle_core::{
    feed::rank, ChatFeed, ConversationKey, GroupId, GroupRecord, RoomId, RoomSummaryRecord,
    ServerMessageId, Timestamp, UnreadChange, UnreadLedger, UserId,
};
use proptest::prelude::*;
use std::cmp::Ordering;

/// Generate an optional last-message time
fn arb_time() -> impl Strategy<Value = Option<u64>> {
    prop_oneof![Just(None), (0u64..1_000).prop_map(Some)]
}

/// Generate a private room listing with distinct counterparts
fn arb_rooms() -> impl Strategy<Value = Vec<RoomSummaryRecord>> {
    prop::collection::vec(arb_time(), 0..12).prop_map(|times| {
        times
            .into_iter()
            .enumerate()
            .map(|(i, time)| RoomSummaryRecord {
                room: RoomId::new(format!("room-{}", i)),
                counterpart: UserId::new(format!("user-{}", i)),
                counterpart_name: None,
                last_message: time.map(|t| format!("msg {}", t)),
                last_message_time: time.map(Timestamp::new),
            })
            .collect()
    })
}

/// Generate a group listing with distinct ids
fn arb_groups() -> impl Strategy<Value = Vec<GroupRecord>> {
    prop::collection::vec(arb_time(), 0..12).prop_map(|times| {
        times
            .into_iter()
            .enumerate()
            .map(|(i, time)| GroupRecord {
                id: GroupId::new(format!("group-{}", i)),
                room: RoomId::new(format!("group-room-{}", i)),
                name: format!("Group {}", i),
                members: vec![],
                last_message: time.map(|t| format!("msg {}", t)),
                last_message_time: time.map(Timestamp::new),
            })
            .collect()
    })
}

proptest! {
    /// Property: The merged feed is always sorted by the ranking order
    #[test]
    fn merged_feed_is_ranked(rooms in arb_rooms(), groups in arb_groups()) {
        let mut feed = ChatFeed::new();
        feed.load(&rooms, &groups);

        for pair in feed.merged().windows(2) {
            prop_assert_ne!(rank(&pair[0], &pair[1]), Ordering::Greater);
        }
    }

    /// Property: Only entries with history appear, each exactly once
    #[test]
    fn merged_feed_contains_entries_with_history(rooms in arb_rooms(), groups in arb_groups()) {
        let mut feed = ChatFeed::new();
        feed.load(&rooms, &groups);

        let expected = rooms.iter().filter(|r| r.last_message_time.is_some()).count()
            + groups.iter().filter(|g| g.last_message_time.is_some()).count();
        prop_assert_eq!(feed.merged().len(), expected);
    }

    /// Property: Newest activity always ranks first and keeps the others' relative order
    #[test]
    fn activity_promotes_to_top(rooms in arb_rooms(), pick in any::<prop::sample::Index>()) {
        prop_assume!(!rooms.is_empty());
        let mut feed = ChatFeed::new();
        feed.replace_private(&rooms);

        let target = &rooms[pick.index(rooms.len())];
        let key = ConversationKey::Private(target.counterpart.clone());
        let before: Vec<_> = feed
            .merged()
            .iter()
            .filter(|s| s.key != key)
            .map(|s| s.key.clone())
            .collect();

        prop_assert!(feed.apply_activity(&key, "latest", Timestamp::new(10_000)));
        prop_assert_eq!(feed.rank_of(&key), Some(0));

        let after: Vec<_> = feed
            .merged()
            .iter()
            .filter(|s| s.key != key)
            .map(|s| s.key.clone())
            .collect();
        prop_assert_eq!(before, after);
    }

    /// Property: Unread equals the number of distinct remote ids for a closed conversation
    #[test]
    fn unread_counts_distinct_ids(ids in prop::collection::vec(0u8..20, 0..60)) {
        let key = ConversationKey::Private(UserId::from("bob"));
        let mut feed = ChatFeed::new();
        feed.apply_activity(&key, "hello", Timestamp::new(1));
        let mut ledger = UnreadLedger::new();

        let mut distinct = std::collections::HashSet::new();
        for id in &ids {
            let change = ledger.record_remote(&mut feed, &key, &ServerMessageId::new(format!("m{}", id)));
            if distinct.insert(*id) {
                prop_assert_eq!(change, UnreadChange::Incremented(distinct.len() as u32));
            } else {
                prop_assert_eq!(change, UnreadChange::Duplicate);
            }
        }
        prop_assert_eq!(feed.unread(&key), distinct.len() as u32);
    }
}
