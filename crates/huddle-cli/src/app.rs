//! Huddle CLI application: session setup and terminal rendering

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use huddle_core::{
    ClientMessageId, ConversationSummary, DeliveryState, Message, Transcript, TransportError,
    UserId,
};
use huddle_runtime::{ChatSession, ConnectionState, ConnectionStatus};

use crate::config::CliAppConfig;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Application
// ----------------------------------------------------------------------------

/// A signed-in CLI session
pub struct HuddleApp {
    session: Arc<ChatSession>,
    config: CliAppConfig,
}

impl HuddleApp {
    /// Create a session backed by the WebSocket transport and HTTP API
    pub fn new(config: CliAppConfig) -> Result<Self> {
        let user = config.user_id()?;
        let session = ChatSession::with_defaults(config.core.clone(), user, config.credential())?;
        Ok(Self {
            session: Arc::new(session),
            config,
        })
    }

    pub fn session(&self) -> &Arc<ChatSession> {
        &self.session
    }

    pub fn config(&self) -> &CliAppConfig {
        &self.config
    }

    /// Connect and wait for the server's welcome
    ///
    /// A failed first attempt is not fatal: reconnection continues in the
    /// background until the connect timeout.
    pub async fn connect(&self) -> Result<()> {
        let mut status = self.session.connection().watch_status();
        if let Err(e) = self.session.start().await {
            warn!("Initial connection failed, retrying: {}", e);
        }

        let secs = self.config.cli.connect_timeout_secs;
        let welcomed = async {
            loop {
                let current = status.borrow_and_update().clone();
                match current.state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Failed => {
                        return Err(CliError::Transport(TransportError::CapacityExceeded {
                            attempts: current.retry_count,
                        }))
                    }
                    _ => {}
                }
                if status.changed().await.is_err() {
                    return Err(CliError::ConnectTimeout(secs));
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(secs), welcomed)
            .await
            .map_err(|_| CliError::ConnectTimeout(secs))??;

        info!("Connected as {}", self.session.identity());
        Ok(())
    }

    pub fn stop(&self) {
        self.session.shutdown();
    }
}

// ----------------------------------------------------------------------------
// Rendering
// ----------------------------------------------------------------------------

/// One chat list line
pub fn format_summary(summary: &ConversationSummary) -> String {
    let badge = match summary.unread {
        0 => String::new(),
        n => format!(" ({})", n),
    };
    let preview = summary.last_message.as_deref().unwrap_or("");
    format!("{}{}  {}", summary.title, badge, preview)
}

/// One transcript line
pub fn format_message(message: &Message, me: &UserId) -> String {
    let sender = if message.sender == *me {
        "you"
    } else {
        message.sender.as_str()
    };
    match &message.state {
        DeliveryState::Confirmed { .. } => format!("{}: {}", sender, message.body),
        DeliveryState::Pending { retries: 0 } => format!("{}: {} [sending]", sender, message.body),
        DeliveryState::Pending { retries } => {
            format!("{}: {} [retry {}]", sender, message.body, retries)
        }
        DeliveryState::Fallback { annotation } => {
            format!("{}: {} [{}]", sender, message.body, annotation)
        }
    }
}

pub fn format_status(status: &ConnectionStatus) -> String {
    let identity = status
        .identity
        .as_ref()
        .map(|user| user.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!("{:?} as {}", status.state, identity);
    if status.retry_count > 0 {
        line.push_str(&format!(" (retry {})", status.retry_count));
    }
    if let Some(error) = &status.last_error {
        line.push_str(&format!(": {}", error));
    }
    line
}

/// Emits a line for every transcript entry that is new or changed state
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    printed: HashMap<ClientMessageId, DeliveryState>,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines to print for `transcript` since the previous call
    pub fn changes(&mut self, transcript: &Transcript, me: &UserId) -> Vec<String> {
        let mut lines = Vec::new();
        for message in transcript.entries() {
            if self.printed.get(&message.client_id) == Some(&message.state) {
                continue;
            }
            self.printed.insert(message.client_id, message.state.clone());
            lines.push(format_message(message, me));
        }

        let withdrawn: Vec<ClientMessageId> = self
            .printed
            .keys()
            .filter(|id| transcript.get(id).is_none())
            .copied()
            .collect();
        for id in withdrawn {
            self.printed.remove(&id);
            lines.push("(a message was not sent)".to_string());
        }
        lines
    }

    /// Skip everything but the last `keep` entries of `transcript`
    pub fn skip_older(&mut self, transcript: &Transcript, keep: usize) {
        let skip = transcript.len().saturating_sub(keep);
        for message in &transcript.entries()[..skip] {
            self.printed.insert(message.client_id, message.state.clone());
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
