//! Huddle CLI entry point

use std::path::Path;

use clap::Parser;
use tracing::{error, info};

use huddle_cli::{
    cli::{Cli, Commands},
    commands::CommandDispatcher,
    config::{CliAppConfig, Overrides},
    error::Result,
    HuddleApp,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Commands::Config = cli.command {
        print!("{}", CliAppConfig::example_config());
        return Ok(());
    }

    let overrides = Overrides {
        user: cli.user.clone(),
        api_url: cli.api_url.clone(),
        endpoint: cli.endpoint.clone(),
        verbose: cli.verbose.then_some(true),
    };
    let config = CliAppConfig::load_with_overrides(cli.config.as_deref().map(Path::new), overrides)?;

    setup_logging(config.cli.verbose);
    info!("Using API {}", config.core.api.base_url);

    let app = HuddleApp::new(config)?;
    if let Err(e) = CommandDispatcher::execute(cli.command, app).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
