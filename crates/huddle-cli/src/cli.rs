//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// User id to sign in as
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// REST API base URL
    #[arg(long)]
    pub api_url: Option<String>,

    /// Realtime transport endpoint
    #[arg(long)]
    pub endpoint: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open a conversation and chat interactively
    Chat {
        /// Private conversation with this user
        #[arg(long, conflicts_with = "group", required_unless_present = "group")]
        with: Option<String>,
        /// Group conversation
        #[arg(long)]
        group: Option<String>,
    },
    /// Send a single message and exit
    Send {
        /// Recipient user id
        #[arg(long, conflicts_with = "group", required_unless_present = "group")]
        to: Option<String>,
        /// Recipient group id
        #[arg(long)]
        group: Option<String>,
        /// Message content
        message: String,
    },
    /// Show the chat list
    Feed {
        /// Keep printing the chat list as it changes
        #[arg(short, long)]
        watch: bool,
    },
    /// Manage groups
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Show connection status
    Status,
    /// Print an example configuration file
    Config,
}

#[derive(Subcommand)]
pub enum GroupAction {
    /// Create a group with the given members
    Create {
        name: String,
        #[arg(short, long)]
        members: Vec<String>,
    },
    /// Rename a group
    Rename { group: String, name: String },
    /// Delete a group
    Delete { group: String },
    /// Add a member to a group
    Add { group: String, user: String },
    /// Remove a member; removing yourself leaves the group
    Remove { group: String, user: String },
}
