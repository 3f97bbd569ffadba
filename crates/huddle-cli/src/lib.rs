//! Huddle CLI library
//!
//! Command parsing, layered configuration and terminal rendering for the
//! Huddle command-line client.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use app::HuddleApp;
pub use cli::{Cli, Commands, GroupAction};
pub use config::{CliAppConfig, ConfigError, Overrides};
pub use error::{CliError, Result};
