//! Error types for configuration validation and XMPP delivery.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration problems detected before any network activity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("hostname is required")]
    MissingHostname,

    #[error("port is required")]
    MissingPort,

    #[error("username and password are required")]
    MissingCredentials,

    #[error("jabberId or chatroomJabberId must be set")]
    NoTarget,

    /// A setting was present but could not be interpreted.
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a transport session.
#[derive(Error, Debug)]
pub enum TransportError {
    /// TCP connect or TLS negotiation failures.
    #[error("Connection error: {0}")]
    Connection(String),

    /// SASL or resource binding failures.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Multi-user chat join rejected or timed out.
    #[error("Failed to join room {room}: {reason}")]
    Room { room: String, reason: String },

    /// Malformed or unexpected stream content.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer closed the stream.
    #[error("Stream closed by server")]
    StreamClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an authentication error.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a room join error.
    pub fn room(room: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Room {
            room: room.into(),
            reason: reason.into(),
        }
    }
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
