//! Shared test doubles for the runtime integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use huddle_core::{
    ApiError, GroupId, GroupRecord, GroupUpdate, MessageDraft, MessageRecord, NewGroup,
    OutboundFrame, Page, RoomId, RoomSummaryRecord, ServerMessageId, Timestamp, TransportError,
    UserId,
};
use huddle_runtime::{ApiResult, DurableApi, LinkCommand, TransportConnector, TransportLink, TransportSignal};

// ----------------------------------------------------------------------------
// Mock Transport
// ----------------------------------------------------------------------------

/// Server end of one mock transport session
pub struct ServerSide {
    pub to_client: mpsc::UnboundedSender<TransportSignal>,
    pub from_client: mpsc::UnboundedReceiver<LinkCommand>,
}

impl ServerSide {
    /// Next frame sent by the client
    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        loop {
            match self.from_client.recv().await? {
                LinkCommand::Text(text) => return serde_json::from_str(&text).ok(),
                LinkCommand::Close => return None,
            }
        }
    }

    /// Frames already sent by the client
    pub fn drain_frames(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(command) = self.from_client.try_recv() {
            if let LinkCommand::Text(text) = command {
                if let Ok(frame) = serde_json::from_str(&text) {
                    frames.push(frame);
                }
            }
        }
        frames
    }

    pub fn push(&self, text: impl Into<String>) {
        let _ = self.to_client.send(TransportSignal::Text(text.into()));
    }

    pub fn push_message(&self, room: &str, sender: &str, body: &str, id: &str, timestamp: u64) {
        self.push(
            serde_json::json!({
                "type": "message-received",
                "payload": {
                    "room": room,
                    "sender": sender,
                    "message": body,
                    "timestamp": timestamp,
                    "id": id,
                }
            })
            .to_string(),
        );
    }

    pub fn close_abnormally(&self, reason: &str) {
        let _ = self.to_client.send(TransportSignal::Closed(huddle_runtime::CloseKind::Abnormal {
            reason: reason.to_string(),
        }));
    }

    pub fn close_normally(&self) {
        let _ = self
            .to_client
            .send(TransportSignal::Closed(huddle_runtime::CloseKind::Normal));
    }
}

pub const WELCOME: &str = r#"{"type":"welcome","payload":{"session":"s-1"}}"#;

/// Connector handing the server end of every session to the test
pub struct MockConnector {
    sessions: mpsc::UnboundedSender<ServerSide>,
    failures_left: AtomicU32,
    opens: AtomicU32,
    auto_welcome: bool,
}

impl MockConnector {
    pub fn new(auto_welcome: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (sessions, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            sessions,
            failures_left: AtomicU32::new(0),
            opens: AtomicU32::new(0),
            auto_welcome,
        });
        (connector, rx)
    }

    /// Refuse the next `count` opens
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn open(&self, endpoint: &str, _credential: &str) -> Result<TransportLink, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: "refused".to_string(),
            });
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        if self.auto_welcome {
            let _ = to_client.send(TransportSignal::Text(WELCOME.to_string()));
        }
        let _ = self.sessions.send(ServerSide {
            to_client,
            from_client,
        });
        Ok(TransportLink { outbound, inbound })
    }
}

// ----------------------------------------------------------------------------
// Scripted Durable API
// ----------------------------------------------------------------------------

/// One scripted response to a message write
pub struct Step {
    pub delay: Duration,
    pub result: ApiResult<()>,
}

impl Step {
    pub fn ok() -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(()),
        }
    }

    pub fn ok_after(delay: Duration) -> Self {
        Self {
            delay,
            result: Ok(()),
        }
    }

    pub fn fail(error: ApiError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(error),
        }
    }
}

#[derive(Default)]
struct ApiState {
    script: VecDeque<Step>,
    drafts: Vec<MessageDraft>,
    rooms: Vec<RoomSummaryRecord>,
    groups: Vec<GroupRecord>,
    history: HashMap<RoomId, Vec<MessageRecord>>,
    reads: Vec<(RoomId, UserId)>,
    history_failure: Option<ApiError>,
    next_id: u32,
}

/// In-memory durable API with scripted write outcomes
#[derive(Default)]
pub struct ScriptedApi {
    state: Mutex<ApiState>,
    calls: AtomicU32,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, steps: impl IntoIterator<Item = Step>) {
        self.state.lock().unwrap().script.extend(steps);
    }

    pub fn with_rooms(&self, rooms: Vec<RoomSummaryRecord>) {
        self.state.lock().unwrap().rooms = rooms;
    }

    pub fn with_groups(&self, groups: Vec<GroupRecord>) {
        self.state.lock().unwrap().groups = groups;
    }

    pub fn with_history(&self, room: &str, records: Vec<MessageRecord>) {
        self.state
            .lock()
            .unwrap()
            .history
            .insert(RoomId::from(room), records);
    }

    /// Fail the next history read with `error`
    pub fn fail_history(&self, error: ApiError) {
        self.state.lock().unwrap().history_failure = Some(error);
    }

    pub fn drafts(&self) -> Vec<MessageDraft> {
        self.state.lock().unwrap().drafts.clone()
    }

    pub fn write_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> Vec<(RoomId, UserId)> {
        self.state.lock().unwrap().reads.clone()
    }

    async fn write(&self, draft: &MessageDraft) -> ApiResult<MessageRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut state = self.state.lock().unwrap();
            state.drafts.push(draft.clone());
            state.script.pop_front().unwrap_or_else(Step::ok)
        };
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.result?;

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        Ok(MessageRecord {
            id: ServerMessageId::new(format!("srv-{}", state.next_id)),
            room: draft.room.clone(),
            sender: draft.sender.clone(),
            body: draft.body.clone(),
            kind: draft.kind,
            created_at: Timestamp::now(),
            client_id: Some(draft.client_id),
        })
    }
}

pub fn room_record(counterpart: &str, room: &str, time: Option<u64>) -> RoomSummaryRecord {
    RoomSummaryRecord {
        room: RoomId::from(room),
        counterpart: UserId::from(counterpart),
        counterpart_name: None,
        last_message: time.map(|_| "earlier".to_string()),
        last_message_time: time.map(Timestamp::new),
    }
}

pub fn group_record(id: &str, room: &str, time: Option<u64>) -> GroupRecord {
    GroupRecord {
        id: GroupId::from(id),
        room: RoomId::from(room),
        name: id.to_string(),
        members: vec![UserId::from("alice")],
        last_message: time.map(|_| "earlier".to_string()),
        last_message_time: time.map(Timestamp::new),
    }
}

#[async_trait]
impl DurableApi for ScriptedApi {
    async fn create_private_room(&self, user_a: &UserId, user_b: &UserId) -> ApiResult<RoomId> {
        let state = self.state.lock().unwrap();
        let existing = state
            .rooms
            .iter()
            .find(|r| r.counterpart == *user_b || r.counterpart == *user_a)
            .map(|r| r.room.clone());
        Ok(existing.unwrap_or_else(|| RoomId::new(format!("dm-{}-{}", user_a, user_b))))
    }

    async fn list_rooms(&self, _user: &UserId) -> ApiResult<Vec<RoomSummaryRecord>> {
        Ok(self.state.lock().unwrap().rooms.clone())
    }

    async fn list_messages(&self, room: &RoomId, page: Page) -> ApiResult<Vec<MessageRecord>> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.history_failure.take() {
            return Err(error);
        }
        let all = state.history.get(room).cloned().unwrap_or_default();
        let start = (page.index * page.size) as usize;
        Ok(all.into_iter().skip(start).take(page.size as usize).collect())
    }

    async fn create_message(&self, draft: &MessageDraft) -> ApiResult<MessageRecord> {
        self.write(draft).await
    }

    async fn list_groups(&self, _member: &UserId) -> ApiResult<Vec<GroupRecord>> {
        Ok(self.state.lock().unwrap().groups.clone())
    }

    async fn create_group(&self, group: &NewGroup) -> ApiResult<GroupRecord> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("g{}", state.next_id);
        let mut members = group.members.clone();
        members.push(group.owner.clone());
        let record = GroupRecord {
            id: GroupId::new(id.clone()),
            room: RoomId::new(format!("room-{}", id)),
            name: group.name.clone(),
            members,
            last_message: None,
            last_message_time: None,
        };
        state.groups.push(record.clone());
        Ok(record)
    }

    async fn update_group(&self, group: &GroupId, update: &GroupUpdate) -> ApiResult<GroupRecord> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .groups
            .iter_mut()
            .find(|g| g.id == *group)
            .ok_or_else(|| ApiError::Rejected {
                status: 404,
                message: "no such group".to_string(),
            })?;
        if let Some(name) = &update.name {
            record.name = name.clone();
        }
        Ok(record.clone())
    }

    async fn delete_group(&self, group: &GroupId) -> ApiResult<()> {
        self.state.lock().unwrap().groups.retain(|g| g.id != *group);
        Ok(())
    }

    async fn list_group_messages(&self, group: &GroupId, page: Page) -> ApiResult<Vec<MessageRecord>> {
        let room = self
            .state
            .lock()
            .unwrap()
            .groups
            .iter()
            .find(|g| g.id == *group)
            .map(|g| g.room.clone());
        match room {
            Some(room) => self.list_messages(&room, page).await,
            None => Ok(Vec::new()),
        }
    }

    async fn create_group_message(&self, _group: &GroupId, draft: &MessageDraft) -> ApiResult<MessageRecord> {
        self.write(draft).await
    }

    async fn add_member(&self, _group: &GroupId, _user: &UserId) -> ApiResult<()> {
        Ok(())
    }

    async fn remove_member(&self, _group: &GroupId, _user: &UserId) -> ApiResult<()> {
        Ok(())
    }

    async fn mark_read(&self, room: &RoomId, user: &UserId) -> ApiResult<()> {
        self.state
            .lock()
            .unwrap()
            .reads
            .push((room.clone(), user.clone()));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Waiting Helpers
// ----------------------------------------------------------------------------

/// Wait until the watched value satisfies `predicate`
pub async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, mut predicate: F)
where
    F: FnMut(&T) -> bool,
{
    let wait = async {
        loop {
            if predicate(&rx.borrow_and_update()) {
                return;
            }
            if rx.changed().await.is_err() {
                panic!("watched value dropped");
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), wait)
        .await
        .expect("condition not reached in time");
}
