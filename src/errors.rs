//! Error types for conversation sessions.
//!
//! Two layers are distinguished:
//!
//! - [`SessionError`] is what the external session library reports (start
//!   failures, rejected sends, unsupported operations).
//! - [`ConversationError`] is what callers of the
//!   [`SessionController`](crate::core::SessionController) observe.
//!
//! Both are `Clone` because one acquisition outcome is shared by every caller
//! waiting on it.

use thiserror::Error;

// =============================================================================
// Session Library Errors
// =============================================================================

/// Errors reported by the external session library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Network negotiation failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Credentials were rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The library gave up waiting
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The session variant does not support the operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A message could not be delivered
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The session is already closed
    #[error("Session closed")]
    Closed,

    /// Internal library error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for session library operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Controller Errors
// =============================================================================

/// Errors surfaced by the session controller.
#[derive(Debug, Clone, Error)]
pub enum ConversationError {
    /// A `begin()` was superseded by a concurrent `end()` before it completed.
    #[error("Session cancelled during connection")]
    SessionCancelled,

    /// The external start call itself failed.
    #[error("Failed to start session: {0}")]
    SessionStartFailed(#[source] SessionError),

    /// A data-plane operation was attempted with no active session.
    #[error("Not connected")]
    NotConnected,

    /// The active session variant cannot switch devices.
    #[error("Device switching is not supported: {0}")]
    DeviceSwitchUnsupported(String),

    /// Session options could not be resolved into a connection config.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The controller was disposed.
    #[error("Conversation controller has been disposed")]
    Disposed,

    /// The active session rejected an operation.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// A background task failed.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for controller operations.
pub type ConversationResult<T> = Result<T, ConversationError>;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
