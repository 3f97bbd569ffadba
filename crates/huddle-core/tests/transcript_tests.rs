//! Transcript reconciliation tests
//!
//! Exercise the echo lifecycle as the dispatch engine drives it: one client
//! id, one visible entry, whatever the sequence of outcomes.

use huddle_core::{
    ClientMessageId, DeliveryState, Message, MessageKind, MessageRecord, ReceivedMessage,
    Reconcile, Reconciled, RoomId, ServerMessageId, Timestamp, Transcript, Transition, UserId,
};

fn echo(body: &str) -> Message {
    Message::echo(
        RoomId::from("r1"),
        UserId::from("alice"),
        body.to_string(),
        MessageKind::Text,
    )
}

fn stored(id: &str, client_id: ClientMessageId, body: &str) -> MessageRecord {
    MessageRecord {
        id: ServerMessageId::from(id),
        room: RoomId::from("r1"),
        sender: UserId::from("alice"),
        body: body.to_string(),
        kind: MessageKind::Text,
        created_at: Timestamp::new(1_000),
        client_id: Some(client_id),
    }
}

#[test]
fn test_retries_then_confirm_leave_one_entry() {
    let mut transcript = Transcript::new(RoomId::from("r1"));
    let message = echo("hi");
    let id = message.client_id;
    transcript.push_echo(message);

    let mut states = vec![transcript.get(&id).unwrap().state.clone()];
    for step in [
        Transition::Retrying { retries: 1 },
        Transition::Retrying { retries: 2 },
        Transition::Confirmed(stored("s1", id, "hi")),
    ] {
        let Reconciled::Updated(message) = transcript.reconcile(&id, Reconcile::Apply(step)).unwrap()
        else {
            panic!("retries and confirmation update in place");
        };
        states.push(message.state);
    }

    assert_eq!(transcript.len(), 1);
    assert_eq!(
        states,
        vec![
            DeliveryState::Pending { retries: 0 },
            DeliveryState::Pending { retries: 1 },
            DeliveryState::Pending { retries: 2 },
            DeliveryState::Confirmed {
                server_id: ServerMessageId::from("s1")
            },
        ]
    );
}

#[test]
fn test_send_order_is_echo_order() {
    let mut transcript = Transcript::new(RoomId::from("r1"));
    let a = echo("A");
    let b = echo("B");
    let (id_a, id_b) = (a.client_id, b.client_id);
    transcript.push_echo(a);
    transcript.push_echo(b);

    // B completes first
    transcript
        .reconcile(&id_b, Reconcile::Apply(Transition::Confirmed(stored("s2", id_b, "B"))))
        .unwrap();
    transcript
        .reconcile(&id_a, Reconcile::Apply(Transition::Confirmed(stored("s1", id_a, "A"))))
        .unwrap();

    let bodies: Vec<_> = transcript.entries().iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["A", "B"]);
}

#[test]
fn test_fallback_stays_visible() {
    let mut transcript = Transcript::new(RoomId::from("r1"));
    let message = echo("hi");
    let id = message.client_id;
    transcript.push_echo(message);

    transcript
        .reconcile(
            &id,
            Reconcile::Apply(Transition::Fallback {
                annotation: "Not delivered".into(),
            }),
        )
        .unwrap();

    assert_eq!(transcript.len(), 1);
    assert!(transcript.entries()[0].is_fallback());
}

#[test]
fn test_live_copy_of_own_message_is_collapsed() {
    let mut transcript = Transcript::new(RoomId::from("r1"));
    let message = echo("hi");
    let id = message.client_id;
    transcript.push_echo(message);

    let live = ReceivedMessage {
        room: RoomId::from("r1"),
        sender: UserId::from("alice"),
        message: "hi".into(),
        timestamp: Timestamp::new(1_000),
        id: Some(ServerMessageId::from("s1")),
        kind: MessageKind::Text,
        group: None,
    };
    assert!(transcript.append_remote(Message::from_received(&live)));

    transcript
        .reconcile(&id, Reconcile::Apply(Transition::Confirmed(stored("s1", id, "hi"))))
        .unwrap();
    assert_eq!(transcript.len(), 1);

    // A second live copy after confirmation is dropped
    assert!(!transcript.append_remote(Message::from_received(&live)));
    assert_eq!(transcript.len(), 1);
}

#[test]
fn test_history_merge_keeps_pending_echo() {
    let mut transcript = Transcript::new(RoomId::from("r1"));
    let message = echo("draft");
    let id = message.client_id;
    transcript.push_echo(message);

    let history = vec![MessageRecord {
        id: ServerMessageId::from("old"),
        room: RoomId::from("r1"),
        sender: UserId::from("bob"),
        body: "earlier".into(),
        kind: MessageKind::Text,
        created_at: Timestamp::new(1),
        client_id: None,
    }];
    assert_eq!(transcript.merge_history(&history), 1);

    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript.entries()[0].body, "earlier");
    assert!(transcript.get(&id).unwrap().is_pending());
}
