//! Error types for the Huddle messaging core
//!
//! The taxonomy follows how each failure propagates: durable API failures are
//! classified so the dispatch engine can pick a retry policy, decode failures
//! cost exactly one frame, and transport failures drive the connection state
//! machine.

use crate::transcript::TranscriptError;
use crate::types::ConversationKey;

// ----------------------------------------------------------------------------
// Durable API Errors
// ----------------------------------------------------------------------------

/// Failure class used to select a retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Request never reached the store; no side effect assumed
    TransientNetwork,
    /// 5xx from the store; side effect unknown
    Server,
    /// Duplicate-key / write race on the store; side effect uncertain
    WriteConflict,
    /// Store refused the request; no side effect
    Rejected,
}

/// Errors returned by the durable API
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network unavailable: {reason}")]
    TransientNetwork { reason: String },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Write conflict: {message}")]
    WriteConflict { message: String },

    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Undecodable response: {reason}")]
    Decode { reason: String },
}

impl ApiError {
    /// Classify this error for retry decisions
    pub fn class(&self) -> FailureClass {
        match self {
            ApiError::TransientNetwork { .. } => FailureClass::TransientNetwork,
            ApiError::Server { .. } => FailureClass::Server,
            // The write happened but its response could not be read back
            ApiError::Decode { .. } => FailureClass::Server,
            ApiError::WriteConflict { .. } => FailureClass::WriteConflict,
            ApiError::Rejected { .. } => FailureClass::Rejected,
        }
    }

    pub fn network<T: Into<String>>(reason: T) -> Self {
        ApiError::TransientNetwork {
            reason: reason.into(),
        }
    }

    pub fn server<T: Into<String>>(status: u16, message: T) -> Self {
        ApiError::Server {
            status,
            message: message.into(),
        }
    }

    pub fn conflict<T: Into<String>>(message: T) -> Self {
        ApiError::WriteConflict {
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Protocol Errors
// ----------------------------------------------------------------------------

/// Malformed inbound transport frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolDecodeError {
    #[error("Malformed frame: {reason}")]
    Malformed { reason: String },

    #[error("Invalid payload for '{tag}': {reason}")]
    InvalidPayload { tag: String, reason: String },
}

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Transport connection errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Transport closed: {reason}")]
    Closed { reason: String },

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Reconnection abandoned after {attempts} attempts")]
    CapacityExceeded { attempts: u32 },
}

// ----------------------------------------------------------------------------
// Core Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Huddle messaging core
#[derive(Debug, thiserror::Error)]
pub enum HuddleError {
    #[error("Durable API error: {0}")]
    Api(#[from] ApiError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolDecodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Send intent rejected before dispatch
    #[error("Message body is empty")]
    EmptyBody,

    #[error("Unknown conversation: {key}")]
    UnknownConversation { key: ConversationKey },

    #[error("Transcript error: {0}")]
    Transcript(#[from] TranscriptError),

    /// Channel communication error
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl HuddleError {
    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        HuddleError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        HuddleError::Configuration {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, HuddleError>;
pub type HuddleResult<T> = Result<T>;
