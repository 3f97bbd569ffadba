//! Huddle CLI Configuration Management
//!
//! Configuration is layered with figment, later layers overriding earlier ones:
//! - Default values
//! - The user config file (`<config dir>/huddle/config.toml`)
//! - `huddle.toml` in the working directory
//! - Environment variables (`HUDDLE_*`, nested keys separated by `__`,
//!   e.g. `HUDDLE_CORE__API__BASE_URL`)
//! - Command line arguments

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use huddle_core::{HuddleConfig, UserId};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the Huddle CLI application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliAppConfig {
    /// Delivery core configuration
    pub core: HuddleConfig,

    /// Who to sign in as
    pub identity: IdentityConfig,

    /// CLI-specific configuration
    pub cli: CliConfig,
}

/// Sign-in identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// User id of this client
    pub user: Option<String>,

    /// Bearer credential for the API and transport
    pub credential: Option<String>,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Enable verbose logging output
    pub verbose: bool,

    /// Transcript lines printed when a conversation opens
    pub history_lines: usize,

    /// Seconds to wait for the server's welcome
    pub connect_timeout_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            history_lines: 20,
            connect_timeout_secs: 10,
        }
    }
}

/// Command line values that override every other layer
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub user: Option<String>,
    pub api_url: Option<String>,
    pub endpoint: Option<String>,
    pub verbose: Option<bool>,
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl CliAppConfig {
    fn base_figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = Self::default_config_path() {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Toml::file("huddle.toml"))
            .merge(Env::prefixed("HUDDLE_").split("__"))
    }

    /// Load configuration with the standard priority order
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_overrides(None, Overrides::default())
    }

    /// Load configuration, optionally from an explicit file, then apply CLI overrides
    pub fn load_with_overrides(file: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
        let mut figment = Self::base_figment();
        if let Some(path) = file {
            if !path.exists() {
                return Err(ConfigError::FileSystem(format!(
                    "Configuration file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        if let Some(user) = overrides.user {
            figment = figment.merge(("identity.user", user));
        }
        if let Some(url) = overrides.api_url {
            figment = figment.merge(("core.api.base_url", url));
        }
        if let Some(endpoint) = overrides.endpoint {
            figment = figment.merge(("core.connection.endpoint", endpoint));
        }
        if let Some(verbose) = overrides.verbose {
            figment = figment.merge(("cli.verbose", verbose));
        }

        let config: CliAppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// User config file, when a config directory is known
    fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("huddle").join("config.toml"))
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.core
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.cli.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }
        if let Some(user) = &self.identity.user {
            if user.trim().is_empty() {
                return Err(ConfigError::Validation("User id cannot be empty".to_string()));
            }
        }
        Ok(())
    }

    /// The configured user id
    pub fn user_id(&self) -> Result<UserId, ConfigError> {
        self.identity
            .user
            .as_deref()
            .map(UserId::from)
            .ok_or_else(|| {
                ConfigError::Validation(
                    "No user configured; pass --user or set HUDDLE_IDENTITY__USER".to_string(),
                )
            })
    }

    /// The configured credential, empty when the server needs none
    pub fn credential(&self) -> String {
        self.identity.credential.clone().unwrap_or_default()
    }

    /// Example configuration file content
    pub fn example_config() -> String {
        let example = CliAppConfig {
            identity: IdentityConfig {
                user: Some("alice".to_string()),
                credential: Some("<token>".to_string()),
            },
            ..Default::default()
        };
        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config_creation() {
        let config = CliAppConfig::default();
        assert!(!config.cli.verbose);
        assert_eq!(config.cli.history_lines, 20);
        assert!(config.identity.user.is_none());
        assert!(config.validate().is_ok());
        assert!(config.user_id().is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = CliAppConfig::default();
        config.identity.user = Some("  ".to_string());
        assert!(config.validate().is_err());

        let mut config = CliAppConfig::default();
        config.core.connection.endpoint.clear();
        assert!(config.validate().is_err());

        let mut config = CliAppConfig::default();
        config.cli.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_layering_file_env_and_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "huddle.toml",
                r#"
                [identity]
                user = "from-file"

                [cli]
                history_lines = 5
                "#,
            )?;
            jail.set_env("HUDDLE_IDENTITY__CREDENTIAL", "secret");
            jail.set_env("HUDDLE_CORE__API__BASE_URL", "http://env.example/api");

            let config = CliAppConfig::load_with_overrides(
                None,
                Overrides {
                    endpoint: Some("ws://cli.example/ws".to_string()),
                    ..Overrides::default()
                },
            )
            .map_err(|e| e.to_string())?;

            assert_eq!(config.identity.user.as_deref(), Some("from-file"));
            assert_eq!(config.credential(), "secret");
            assert_eq!(config.cli.history_lines, 5);
            assert_eq!(config.core.api.base_url, "http://env.example/api");
            assert_eq!(config.core.connection.endpoint, "ws://cli.example/ws");
            Ok(())
        });
    }

    #[test]
    fn test_cli_user_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("huddle.toml", "[identity]\nuser = \"from-file\"\n")?;
            let config = CliAppConfig::load_with_overrides(
                None,
                Overrides {
                    user: Some("from-cli".to_string()),
                    ..Overrides::default()
                },
            )
            .map_err(|e| e.to_string())?;
            assert_eq!(config.user_id().map_err(|e| e.to_string())?, UserId::from("from-cli"));
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = CliAppConfig::load_with_overrides(
            Some(Path::new("/nonexistent/huddle.toml")),
            Overrides::default(),
        );
        assert!(matches!(result, Err(ConfigError::FileSystem(_))));
    }

    #[test]
    fn test_example_config_generation() {
        let example = CliAppConfig::example_config();
        assert!(example.contains("[identity]"));
        assert!(example.contains("[cli]"));
        assert!(example.contains("alice"));
    }
}
