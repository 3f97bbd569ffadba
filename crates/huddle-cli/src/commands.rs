//! Command handlers for the Huddle CLI

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use huddle_core::{ConversationKey, GroupId, UserId};
use huddle_runtime::{DispatchOutcome, OpenConversation};

use crate::app::{format_status, format_summary, HuddleApp, TranscriptPrinter};
use crate::cli::{Commands, GroupAction};
use crate::config::CliAppConfig;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(command: Commands, app: HuddleApp) -> Result<()> {
        let result = match command {
            Commands::Chat { with, group } => Self::handle_chat_command(&app, with, group).await,
            Commands::Send { to, group, message } => {
                Self::handle_send_command(&app, to, group, message).await
            }
            Commands::Feed { watch } => Self::handle_feed_command(&app, watch).await,
            Commands::Group { action } => Self::handle_group_command(&app, action).await,
            Commands::Status => Self::handle_status_command(&app).await,
            Commands::Config => {
                print!("{}", CliAppConfig::example_config());
                Ok(())
            }
        };
        app.stop();
        result
    }

    fn conversation_key(user: Option<String>, group: Option<String>) -> Result<ConversationKey> {
        match (user, group) {
            (_, Some(group)) => Ok(ConversationKey::Group(GroupId::from(group))),
            (Some(user), None) => Ok(ConversationKey::Private(UserId::from(user))),
            (None, None) => Err(CliError::Usage(
                "a user or a group is required".to_string(),
            )),
        }
    }

    /// Handle the chat command
    async fn handle_chat_command(
        app: &HuddleApp,
        with: Option<String>,
        group: Option<String>,
    ) -> Result<()> {
        app.connect().await?;
        let session = app.session().clone();
        session.load_feed().await?;

        let key = Self::conversation_key(with, group)?;
        let OpenConversation {
            mut transcript,
            key,
            ..
        } = match &key {
            ConversationKey::Private(user) => session.open_private(user).await?,
            ConversationKey::Group(group) => session.open_group(group).await?,
        };
        info!("Chatting in {}; type /quit to leave", key);

        let me = session.identity().clone();
        let mut printer = TranscriptPrinter::new();
        printer.skip_older(&transcript.borrow_and_update(), app.config().cli.history_lines);
        for line in printer.changes(&transcript.borrow(), &me) {
            println!("{}", line);
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut status = session.connection().watch_status();
        loop {
            tokio::select! {
                changed = transcript.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    for line in printer.changes(&transcript.borrow_and_update(), &me) {
                        println!("{}", line);
                    }
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    println!("-- {}", format_status(&status.borrow_and_update()));
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    let line = line.trim().to_string();
                    if line == "/quit" {
                        break;
                    }
                    if line.is_empty() {
                        continue;
                    }
                    let session = session.clone();
                    let key = key.clone();
                    tokio::spawn(async move {
                        let outcome = match &key {
                            ConversationKey::Private(user) => session.send_private(user, &line).await,
                            ConversationKey::Group(group) => session.send_group(group, &line).await,
                        };
                        if let Err(e) = outcome {
                            warn!("Send failed: {}", e);
                        }
                    });
                }
            }
        }

        session.close_conversation();
        Ok(())
    }

    /// Handle the send command
    async fn handle_send_command(
        app: &HuddleApp,
        to: Option<String>,
        group: Option<String>,
        message: String,
    ) -> Result<()> {
        let session = app.session();
        let outcome = match Self::conversation_key(to, group)? {
            ConversationKey::Private(user) => session.send_private(&user, &message).await?,
            ConversationKey::Group(group) => {
                session.load_feed().await?;
                session.send_group(&group, &message).await?
            }
        };

        match outcome {
            DispatchOutcome::Confirmed(message) => {
                let id = message
                    .server_id()
                    .map(|id| id.to_string())
                    .unwrap_or_default();
                println!("Message sent (ID: {})", id);
                Ok(())
            }
            DispatchOutcome::Fallback { error, .. } | DispatchOutcome::Withdrawn { error, .. } => {
                Err(CliError::Delivery(error.to_string()))
            }
        }
    }

    /// Handle the feed command
    async fn handle_feed_command(app: &HuddleApp, watch: bool) -> Result<()> {
        let session = app.session();
        let feed = session.load_feed().await?;
        Self::print_feed(feed.merged());
        if !watch {
            return Ok(());
        }

        app.connect().await?;
        info!("Watching chat list... Press Ctrl+C to stop");
        let mut updates = session.watch_feed();
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let feed = updates.borrow_and_update().clone();
                    Self::print_feed(feed.merged());
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok(())
    }

    fn print_feed(entries: &[huddle_core::ConversationSummary]) {
        println!("Chats");
        println!("=====");
        if entries.is_empty() {
            println!("No conversations yet");
        }
        for summary in entries {
            println!("{}", format_summary(summary));
        }
    }

    /// Handle group management commands
    async fn handle_group_command(app: &HuddleApp, action: GroupAction) -> Result<()> {
        let session = app.session();
        session.load_feed().await?;
        match action {
            GroupAction::Create { name, members } => {
                let members = members.into_iter().map(UserId::from).collect();
                let group = session.create_group(&name, members).await?;
                println!("Created group {} (ID: {})", group.name, group.id);
            }
            GroupAction::Rename { group, name } => {
                let record = session.rename_group(&GroupId::from(group), &name).await?;
                println!("Renamed group {} to {}", record.id, record.name);
            }
            GroupAction::Delete { group } => {
                session.delete_group(&GroupId::from(group.as_str())).await?;
                println!("Deleted group {}", group);
            }
            GroupAction::Add { group, user } => {
                session
                    .add_member(&GroupId::from(group.as_str()), &UserId::from(user.as_str()))
                    .await?;
                println!("Added {} to {}", user, group);
            }
            GroupAction::Remove { group, user } => {
                session
                    .remove_member(&GroupId::from(group.as_str()), &UserId::from(user.as_str()))
                    .await?;
                println!("Removed {} from {}", user, group);
            }
        }
        Ok(())
    }

    /// Handle the status command
    async fn handle_status_command(app: &HuddleApp) -> Result<()> {
        let connected = app.connect().await;
        println!("{}", format_status(&app.session().status()));
        connected
    }
}
