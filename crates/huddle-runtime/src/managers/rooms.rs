//! Room subscription registry
//!
//! Tracks which rooms the session has joined and fans every inbound
//! `message-received` frame out to the listeners registered for its room.
//! Leaving a room is deferred until its last listener detaches, and every
//! active room is joined again whenever the transport (re)connects.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use hashbrown::HashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use huddle_core::{OutboundFrame, ReceivedMessage, RoomId};

use super::connection::{ConnectionManager, LifecycleEvent};

/// Callback invoked for each message delivered to a room
pub type RoomListener = Arc<dyn Fn(&ReceivedMessage) + Send + Sync>;

/// Identifier of a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct RoomEntry {
    /// Joined and not yet left
    active: bool,
    /// Leave requested while listeners were still attached
    leave_pending: bool,
    listeners: HashMap<ListenerId, RoomListener>,
}

impl RoomEntry {
    /// Joined on the server. A room with a pending leave still counts: it is
    /// only left once its last listener detaches, so it is rejoined after a
    /// reconnect like any other active room.
    fn is_joined(&self) -> bool {
        self.active
    }
}

struct Registry {
    connection: ConnectionManager,
    rooms: Mutex<HashMap<RoomId, RoomEntry>>,
    next_listener: AtomicU64,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Room Registry
// ----------------------------------------------------------------------------

/// Owned map of room to listeners
#[derive(Clone)]
pub struct RoomRegistry {
    registry: Arc<Registry>,
}

impl RoomRegistry {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            registry: Arc::new(Registry {
                connection,
                rooms: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Start routing inbound messages and lifecycle events
    pub fn start(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let mut messages = registry.connection.subscribe_messages();
        let mut lifecycle = registry.connection.subscribe_lifecycle();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = registry.cancel.cancelled() => break,
                    received = messages.recv() => match received {
                        Ok(message) => registry.deliver(&message),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Room registry lagged, {} messages skipped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    event = lifecycle.recv() => match event {
                        Ok(LifecycleEvent::Connected { resumed }) => registry.rejoin_active(resumed),
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Room registry lagged, {} lifecycle events skipped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Room registry stopped");
        })
    }

    /// Stop the routing task
    pub fn shutdown(&self) {
        self.registry.cancel.cancel();
    }

    /// Mark `room` active and signal a join when connected
    pub fn join(&self, room: &RoomId) {
        let newly_active = {
            let mut rooms = lock(&self.registry.rooms);
            let entry = rooms.entry(room.clone()).or_default();
            entry.leave_pending = false;
            !std::mem::replace(&mut entry.active, true)
        };
        if newly_active && self.registry.connection.is_connected() {
            self.registry
                .connection
                .send(&OutboundFrame::JoinRoom { room: room.clone() });
        }
    }

    /// Request leaving `room`; effective once its last listener detaches
    pub fn leave(&self, room: &RoomId) {
        let mut rooms = lock(&self.registry.rooms);
        let Some(entry) = rooms.get_mut(room) else {
            return;
        };
        if entry.listeners.is_empty() {
            let entry = rooms.remove(room);
            drop(rooms);
            if entry.is_some_and(|e| e.active) {
                self.registry.signal_leave(room);
            }
        } else {
            debug!(
                "Deferring leave of {} until {} listeners detach",
                room,
                entry.listeners.len()
            );
            entry.leave_pending = true;
        }
    }

    /// Attach a listener to `room`
    pub fn register_listener<F>(&self, room: &RoomId, listener: F) -> RoomSubscription
    where
        F: Fn(&ReceivedMessage) + Send + Sync + 'static,
    {
        let id = ListenerId(self.registry.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.registry.rooms)
            .entry(room.clone())
            .or_default()
            .listeners
            .insert(id, Arc::new(listener));
        RoomSubscription {
            registry: Arc::downgrade(&self.registry),
            room: room.clone(),
            id,
            disposed: false,
        }
    }

    /// Rooms currently marked active
    pub fn active_rooms(&self) -> Vec<RoomId> {
        lock(&self.registry.rooms)
            .iter()
            .filter(|(_, entry)| entry.is_joined())
            .map(|(room, _)| room.clone())
            .collect()
    }

    pub fn listener_count(&self, room: &RoomId) -> usize {
        lock(&self.registry.rooms)
            .get(room)
            .map(|entry| entry.listeners.len())
            .unwrap_or(0)
    }

    /// Deliver a message to the listeners of its room
    pub fn deliver(&self, message: &ReceivedMessage) {
        self.registry.deliver(message);
    }
}

impl Registry {
    fn deliver(&self, message: &ReceivedMessage) {
        let listeners: Vec<RoomListener> = match lock(&self.rooms).get(&message.room) {
            Some(entry) => entry.listeners.values().cloned().collect(),
            None => {
                debug!("No listeners for room {}", message.room);
                return;
            }
        };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(message))).is_err() {
                error!("Listener for room {} panicked", message.room);
            }
        }
    }

    fn rejoin_active(&self, resumed: bool) {
        let rooms: Vec<RoomId> = lock(&self.rooms)
            .iter()
            .filter(|(_, entry)| entry.is_joined())
            .map(|(room, _)| room.clone())
            .collect();
        if !rooms.is_empty() {
            info!("Joining {} active rooms (resumed: {})", rooms.len(), resumed);
        }
        for room in rooms {
            self.connection.send(&OutboundFrame::JoinRoom { room });
        }
    }

    fn signal_leave(&self, room: &RoomId) {
        if self.connection.is_connected() {
            self.connection
                .send(&OutboundFrame::LeaveRoom { room: room.clone() });
        }
    }

    fn unregister(&self, room: &RoomId, id: ListenerId) {
        let mut rooms = lock(&self.rooms);
        let Some(entry) = rooms.get_mut(room) else {
            return;
        };
        entry.listeners.remove(&id);
        if !entry.listeners.is_empty() {
            return;
        }
        if entry.leave_pending {
            let was_active = entry.active;
            rooms.remove(room);
            drop(rooms);
            debug!("Last listener detached, leaving {}", room);
            if was_active {
                self.signal_leave(room);
            }
        } else if !entry.active {
            rooms.remove(room);
        }
    }
}

// ----------------------------------------------------------------------------
// Subscription Handle
// ----------------------------------------------------------------------------

/// Dispose handle returned by [`RoomRegistry::register_listener`]
///
/// The listener is detached when the handle is disposed or dropped.
#[must_use = "dropping the subscription detaches the listener"]
pub struct RoomSubscription {
    registry: Weak<Registry>,
    room: RoomId,
    id: ListenerId,
    disposed: bool,
}

impl RoomSubscription {
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn dispose(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if std::mem::replace(&mut self.disposed, true) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.room, self.id);
        }
    }
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for RoomSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSubscription")
            .field("room", &self.room)
            .field("id", &self.id)
            .field("disposed", &self.disposed)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
