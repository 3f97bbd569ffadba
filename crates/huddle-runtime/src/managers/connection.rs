//! Transport connection management for the Huddle runtime
//!
//! The [`ConnectionManager`] owns the single persistent transport of a session.
//! It publishes a [`ConnectionStatus`] snapshot through a `watch` channel,
//! broadcasts lifecycle events, decodes inbound frames into typed broadcast
//! channels and reconnects with linear backoff after abnormal closure.
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Reconnecting -> { Connected | Failed }
//! ```
//!
//! `disconnect()` is valid from any state and is the only way out of `Failed`.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use huddle_core::{
    decode_inbound, ConnectionConfig, Decoded, InboundFrame, Notification, OutboundFrame,
    ReceivedMessage, TransportError, UserId, Welcome,
};

use crate::transport::{CloseKind, LinkCommand, TransportConnector, TransportLink, TransportSignal};

// ----------------------------------------------------------------------------
// Status Types
// ----------------------------------------------------------------------------

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnection attempts exhausted
    Failed,
}

impl ConnectionState {
    /// States in which `connect` is a no-op
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }
}

/// Snapshot of the connection published to observers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub identity: Option<UserId>,
    /// Reconnection attempts since the last successful connection
    pub retry_count: u32,
    /// Persistent error shown while reconnecting or failed
    pub last_error: Option<String>,
}

/// Connection lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Server acknowledged the session; `resumed` after a reconnection
    Connected { resumed: bool },
    Disconnected,
    Reconnecting { attempt: u32 },
    Failed { attempts: u32 },
}

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

struct Inner {
    outbound: Option<mpsc::UnboundedSender<LinkCommand>>,
    cancel: Option<CancellationToken>,
}

struct Shared {
    config: ConnectionConfig,
    connector: Arc<dyn TransportConnector>,
    status: watch::Sender<ConnectionStatus>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    welcomes: broadcast::Sender<Welcome>,
    messages: broadcast::Sender<ReceivedMessage>,
    notifications: broadcast::Sender<Notification>,
    inner: Mutex<Inner>,
}

/// Lock a mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Manages the persistent transport of one session
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.shared.config.endpoint)
            .field("status", &*self.shared.status.borrow())
            .finish()
    }
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new(config: ConnectionConfig, connector: Arc<dyn TransportConnector>) -> Self {
        let capacity = config.event_buffer_size.max(1);
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                status,
                lifecycle: broadcast::channel(capacity).0,
                welcomes: broadcast::channel(capacity).0,
                messages: broadcast::channel(capacity).0,
                notifications: broadcast::channel(capacity).0,
                inner: Mutex::new(Inner {
                    outbound: None,
                    cancel: None,
                }),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// Current status snapshot
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.status.borrow().state == ConnectionState::Connected
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.shared.lifecycle.subscribe()
    }

    pub fn subscribe_welcome(&self) -> broadcast::Receiver<Welcome> {
        self.shared.welcomes.subscribe()
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<ReceivedMessage> {
        self.shared.messages.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.shared.notifications.subscribe()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Open the transport and log in as `identity`.
    ///
    /// No-op while connecting, connected or reconnecting. The state becomes
    /// `Connected` once the server's welcome arrives. If the transport cannot
    /// be opened the error is returned and reconnection starts in the
    /// background.
    pub async fn connect(
        &self,
        identity: UserId,
        credential: impl Into<String>,
    ) -> Result<(), TransportError> {
        let credential = credential.into();

        let mut failed_attempts = None;
        let claimed = self.shared.status.send_if_modified(|status| match status.state {
            state if state.is_active() => false,
            ConnectionState::Failed => {
                failed_attempts = Some(status.retry_count);
                false
            }
            _ => {
                *status = ConnectionStatus {
                    state: ConnectionState::Connecting,
                    identity: Some(identity.clone()),
                    retry_count: 0,
                    last_error: None,
                };
                true
            }
        });
        if let Some(attempts) = failed_attempts {
            warn!("Connection failed earlier; disconnect before connecting again");
            return Err(TransportError::CapacityExceeded { attempts });
        }
        if !claimed {
            debug!("Connect ignored, connection already active");
            return Ok(());
        }

        let token = CancellationToken::new();
        {
            let mut inner = lock(&self.shared.inner);
            if let Some(previous) = inner.cancel.replace(token.clone()) {
                previous.cancel();
            }
        }

        info!("Connecting to {} as {}", self.shared.config.endpoint, identity);
        let opened = self
            .shared
            .connector
            .open(&self.shared.config.endpoint, &credential)
            .await;

        let driver = Driver {
            shared: self.shared.clone(),
            token,
            identity,
            credential,
        };

        match opened {
            Ok(link) => {
                let link = driver.login(link);
                tokio::spawn(driver.run(link));
                Ok(())
            }
            Err(e) => {
                warn!("Initial connection failed: {}", e);
                driver.shared.set_last_error(&driver.token, e.to_string());
                tokio::spawn(driver.run(None));
                Err(e)
            }
        }
    }

    /// Close the transport normally and stop reconnecting
    pub fn disconnect(&self) {
        {
            let mut inner = lock(&self.shared.inner);
            if let Some(token) = inner.cancel.take() {
                token.cancel();
            }
            if let Some(outbound) = inner.outbound.take() {
                let _ = outbound.send(LinkCommand::Close);
            }
        }

        let changed = self.shared.status.send_if_modified(|status| {
            if status.state == ConnectionState::Disconnected {
                return false;
            }
            *status = ConnectionStatus::default();
            true
        });
        if changed {
            info!("Disconnected");
            let _ = self.shared.lifecycle.send(LifecycleEvent::Disconnected);
        }
    }

    /// Send a frame; `false` with a warning when not connected
    pub fn send(&self, frame: &OutboundFrame) -> bool {
        if !self.is_connected() {
            warn!("Dropping '{}' frame, transport not connected", frame.tag());
            return false;
        }
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode '{}' frame: {}", frame.tag(), e);
                return false;
            }
        };
        let inner = lock(&self.shared.inner);
        match inner.outbound.as_ref() {
            Some(outbound) if outbound.send(LinkCommand::Text(text)).is_ok() => {
                debug!("Sent '{}' frame", frame.tag());
                true
            }
            _ => {
                warn!("Dropping '{}' frame, transport link closed", frame.tag());
                false
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Shared State Updates
// ----------------------------------------------------------------------------

impl Shared {
    /// Publish a status change unless the session was cancelled
    fn update_status(&self, token: &CancellationToken, f: impl FnOnce(&mut ConnectionStatus)) -> bool {
        self.status.send_if_modified(|status| {
            if token.is_cancelled() {
                return false;
            }
            f(status);
            true
        })
    }

    fn set_last_error(&self, token: &CancellationToken, reason: String) {
        self.update_status(token, |status| status.last_error = Some(reason));
    }

    fn emit(&self, token: &CancellationToken, event: LifecycleEvent) {
        if !token.is_cancelled() {
            let _ = self.lifecycle.send(event);
        }
    }

    fn route_frame(&self, text: &str) -> Option<Welcome> {
        match decode_inbound(text) {
            Ok(Decoded::Frame(InboundFrame::Welcome(welcome))) => Some(welcome),
            Ok(Decoded::Frame(InboundFrame::MessageReceived(message))) => {
                debug!("Message received in room {}", message.room);
                let _ = self.messages.send(message);
                None
            }
            Ok(Decoded::Frame(InboundFrame::NotificationReceived(notification))) => {
                let _ = self.notifications.send(notification);
                None
            }
            Ok(Decoded::Unrecognized { tag }) => {
                warn!("Dropping frame with unrecognized tag '{}'", tag);
                None
            }
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                None
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Connection Driver
// ----------------------------------------------------------------------------

/// How a link session ended
enum SessionEnd {
    Cancelled,
    Closed { kind: CloseKind, welcomed: bool },
}

/// Background task owning one connection session and its reconnections
struct Driver {
    shared: Arc<Shared>,
    token: CancellationToken,
    identity: UserId,
    credential: String,
}

impl Driver {
    /// Install the link's outbound channel and send the login frame
    fn login(&self, link: TransportLink) -> Option<TransportLink> {
        let login = OutboundFrame::Login {
            identity: self.identity.clone(),
        };
        match login.encode() {
            Ok(text) => {
                let _ = link.outbound.send(LinkCommand::Text(text));
            }
            Err(e) => error!("Failed to encode login frame: {}", e),
        }
        let mut inner = lock(&self.shared.inner);
        if self.token.is_cancelled() {
            let _ = link.outbound.send(LinkCommand::Close);
            return None;
        }
        inner.outbound = Some(link.outbound.clone());
        Some(link)
    }

    async fn run(self, mut link: Option<TransportLink>) {
        let reconnect = self.shared.config.reconnect.clone();
        let mut attempt: u32 = 0;
        let mut has_connected = false;

        loop {
            if let Some(current) = link.take() {
                match self.pump(current, &mut has_connected).await {
                    SessionEnd::Cancelled => return,
                    SessionEnd::Closed {
                        kind: CloseKind::Normal,
                        ..
                    } => {
                        info!("Transport closed normally");
                        lock(&self.shared.inner).outbound = None;
                        let changed = self.shared.update_status(&self.token, |status| {
                            *status = ConnectionStatus::default();
                        });
                        if changed {
                            let _ = self.shared.lifecycle.send(LifecycleEvent::Disconnected);
                        }
                        return;
                    }
                    SessionEnd::Closed {
                        kind: CloseKind::Abnormal { reason },
                        welcomed,
                    } => {
                        warn!("Transport closed abnormally: {}", reason);
                        lock(&self.shared.inner).outbound = None;
                        self.shared.set_last_error(&self.token, reason);
                        if welcomed {
                            attempt = 0;
                        }
                    }
                }
            }

            attempt += 1;
            if attempt > reconnect.max_attempts {
                let attempts = reconnect.max_attempts;
                let failure = TransportError::CapacityExceeded { attempts };
                error!("{}", failure);
                self.shared.update_status(&self.token, |status| {
                    status.state = ConnectionState::Failed;
                    status.last_error = Some(failure.to_string());
                });
                self.shared.emit(&self.token, LifecycleEvent::Failed { attempts });
                return;
            }

            self.shared.update_status(&self.token, |status| {
                status.state = ConnectionState::Reconnecting;
                status.retry_count = attempt;
            });
            self.shared
                .emit(&self.token, LifecycleEvent::Reconnecting { attempt });

            let delay = reconnect.delay_for(attempt);
            info!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay, attempt, reconnect.max_attempts
            );
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let opened = tokio::select! {
                _ = self.token.cancelled() => return,
                opened = self.shared.connector.open(&self.shared.config.endpoint, &self.credential) => opened,
            };
            match opened {
                Ok(fresh) => link = self.login(fresh),
                Err(e) => {
                    warn!("Reconnection attempt {} failed: {}", attempt, e);
                    self.shared.set_last_error(&self.token, e.to_string());
                }
            }
            if link.is_none() && self.token.is_cancelled() {
                return;
            }
        }
    }

    /// Forward inbound signals until the link closes or the session is cancelled
    async fn pump(&self, mut link: TransportLink, has_connected: &mut bool) -> SessionEnd {
        let mut welcomed = false;
        loop {
            let signal = tokio::select! {
                _ = self.token.cancelled() => {
                    let _ = link.outbound.send(LinkCommand::Close);
                    return SessionEnd::Cancelled;
                }
                signal = link.inbound.recv() => signal,
            };

            match signal {
                Some(TransportSignal::Text(text)) => {
                    let Some(welcome) = self.shared.route_frame(&text) else {
                        continue;
                    };
                    let resumed = *has_connected;
                    let changed = self.shared.update_status(&self.token, |status| {
                        status.state = ConnectionState::Connected;
                        status.retry_count = 0;
                        status.last_error = None;
                    });
                    if changed {
                        info!("Connected as {} (resumed: {})", self.identity, resumed);
                        *has_connected = true;
                        welcomed = true;
                        let _ = self.shared.welcomes.send(welcome);
                        let _ = self
                            .shared
                            .lifecycle
                            .send(LifecycleEvent::Connected { resumed });
                    }
                }
                Some(TransportSignal::Closed(kind)) => {
                    return SessionEnd::Closed { kind, welcomed };
                }
                None => {
                    return SessionEnd::Closed {
                        kind: CloseKind::Abnormal {
                            reason: "transport link dropped".to_string(),
                        },
                        welcomed,
                    };
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
