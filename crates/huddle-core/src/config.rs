//! Centralized Configuration Management
//!
//! Configuration for every component of the delivery core, with presets for
//! production and for fast deterministic tests.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{FailureClass, HuddleError, Result};
use crate::retry::RetryPolicy;

// ----------------------------------------------------------------------------
// Durable API Configuration
// ----------------------------------------------------------------------------

/// Configuration for the durable request/response API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the REST surface
    pub base_url: String,
    /// Per-request timeout; a timeout counts as a transient network failure
    pub request_timeout: Duration,
    /// Page size for history requests
    pub page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            request_timeout: Duration::from_secs(15),
            page_size: 50,
        }
    }
}

// ----------------------------------------------------------------------------
// Connection Configuration
// ----------------------------------------------------------------------------

/// Reconnection backoff for the persistent transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay multiplied by the attempt number
    pub base_delay: Duration,
    /// Attempts before the connection is declared failed
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnection attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }

    /// Total time spent waiting if every attempt is used
    pub fn backoff_window(&self) -> Duration {
        (1..=self.max_attempts)
            .map(|attempt| self.delay_for(attempt))
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }
}

/// Configuration for the transport connection manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Transport endpoint URL
    pub endpoint: String,
    /// Reconnection behaviour after abnormal closure
    pub reconnect: ReconnectConfig,
    /// Capacity of each typed inbound broadcast channel
    pub event_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8080/ws".to_string(),
            reconnect: ReconnectConfig::default(),
            event_buffer_size: 256,
        }
    }
}

// ----------------------------------------------------------------------------
// Dispatch Configuration
// ----------------------------------------------------------------------------

/// Retry policies of the message dispatch engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Policy for 5xx failures
    pub server_error: RetryPolicy,
    /// Policy for duplicate-key races
    pub write_conflict: RetryPolicy,
    /// Annotation shown on messages that exhausted server retries
    pub fallback_annotation: String,
    /// Annotation shown on messages whose conflict retry also failed
    pub conflict_annotation: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            server_error: RetryPolicy::linear(3, Duration::from_secs(1)),
            write_conflict: RetryPolicy::fixed(2, Duration::from_secs(3)),
            fallback_annotation: "Not delivered".to_string(),
            conflict_annotation: "Delivery state unknown".to_string(),
        }
    }
}

impl DispatchConfig {
    /// Fast policies for tests
    pub fn testing() -> Self {
        Self {
            server_error: RetryPolicy::linear(3, Duration::from_millis(100)),
            write_conflict: RetryPolicy::fixed(2, Duration::from_millis(250)),
            ..Self::default()
        }
    }

    /// Policy for a failure class; `None` means never retry
    pub fn policy_for(&self, class: FailureClass) -> Option<RetryPolicy> {
        match class {
            FailureClass::Server => Some(self.server_error.clone()),
            FailureClass::WriteConflict => Some(self.write_conflict.clone()),
            FailureClass::TransientNetwork | FailureClass::Rejected => None,
        }
    }

    /// Validate policy relationships
    pub fn validate(&self) -> Result<()> {
        if self.server_error.max_attempts == 0 || self.write_conflict.max_attempts == 0 {
            return Err(HuddleError::config_error(
                "retry policies need at least one attempt",
            ));
        }
        if self.write_conflict.max_attempts > 2 {
            return Err(HuddleError::config_error(
                "write conflicts are retried at most once",
            ));
        }
        if self.write_conflict.longest_delay() <= self.server_error.longest_delay() {
            return Err(HuddleError::config_error(format!(
                "conflict cooldown ({:?}) must exceed the longest server retry delay ({:?})",
                self.write_conflict.longest_delay(),
                self.server_error.longest_delay()
            )));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Main Configuration
// ----------------------------------------------------------------------------

/// Complete configuration of the delivery core
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuddleConfig {
    pub api: ApiConfig,
    pub connection: ConnectionConfig,
    pub dispatch: DispatchConfig,
}

impl HuddleConfig {
    /// Create new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration optimized for testing (short delays)
    pub fn testing() -> Self {
        Self {
            api: ApiConfig {
                request_timeout: Duration::from_secs(2),
                ..ApiConfig::default()
            },
            connection: ConnectionConfig {
                reconnect: ReconnectConfig {
                    base_delay: Duration::from_millis(50),
                    max_attempts: 3,
                },
                ..ConnectionConfig::default()
            },
            dispatch: DispatchConfig::testing(),
        }
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.is_empty() {
            return Err(HuddleError::config_error("api.base_url is empty"));
        }
        if self.connection.endpoint.is_empty() {
            return Err(HuddleError::config_error("connection.endpoint is empty"));
        }
        if self.connection.event_buffer_size == 0 {
            return Err(HuddleError::config_error(
                "connection.event_buffer_size must be positive",
            ));
        }
        self.dispatch.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        HuddleConfig::default().validate().unwrap();
        HuddleConfig::testing().validate().unwrap();
    }

    #[test]
    fn test_conflict_cooldown_must_exceed_server_delay() {
        let mut config = DispatchConfig::default();
        config.write_conflict = RetryPolicy::fixed(2, Duration::from_secs(2));

        // Longest server delay is 2s (second retry), equal is not enough
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_delays() {
        let reconnect = ReconnectConfig {
            base_delay: Duration::from_millis(100),
            max_attempts: 3,
        };
        assert_eq!(reconnect.delay_for(3), Duration::from_millis(300));
        assert_eq!(reconnect.backoff_window(), Duration::from_millis(600));
    }

    #[test]
    fn test_policy_lookup() {
        let config = DispatchConfig::default();
        assert!(config.policy_for(FailureClass::TransientNetwork).is_none());
        assert_eq!(
            config.policy_for(FailureClass::WriteConflict),
            Some(config.write_conflict.clone())
        );
    }
}
