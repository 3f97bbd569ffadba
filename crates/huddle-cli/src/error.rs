//! Error handling for the Huddle CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Huddle error: {0}")]
    Huddle(#[from] huddle_core::HuddleError),

    #[error("Transport error: {0}")]
    Transport(#[from] huddle_core::TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Message not delivered: {0}")]
    Delivery(String),

    #[error("Not connected within {0} seconds")]
    ConnectTimeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
