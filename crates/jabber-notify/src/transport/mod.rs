//! Delivery transport capability.
//!
//! A [`Transport`] opens [`Session`]s; a session logs in, addresses a
//! recipient or a room, sends text and disconnects. The dispatcher only talks
//! to these traits and never builds protocol stanzas itself.

mod xmpp;

pub use xmpp::XmppTransport;

use async_trait::async_trait;

use crate::error::TransportError;

/// Connection parameters for a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// XMPP service domain addressed in the stream header.
    pub domain: String,
    /// Request stream compression.
    pub compression: bool,
    /// Authenticate with SASL.
    pub sasl: bool,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16, domain: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            domain: domain.into(),
            compression: true,
            sasl: true,
        }
    }
}

/// An addressed conversation within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatHandle {
    /// One-to-one chat with `jid`.
    Direct { jid: String, thread: String },
    /// Joined multi-user chat room.
    Room { jid: String, nickname: String },
}

impl ChatHandle {
    pub fn jid(&self) -> &str {
        match self {
            Self::Direct { jid, .. } | Self::Room { jid, .. } => jid,
        }
    }
}

/// Opens sessions against a chat server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name, used in log fields.
    fn name(&self) -> &'static str;

    /// Open a connection. Authentication happens in [`Session::login`].
    async fn connect(&self, options: &ConnectOptions)
    -> Result<Box<dyn Session>, TransportError>;
}

/// A connected session, exclusively owned by one notification.
#[async_trait]
pub trait Session: Send {
    /// Authenticate and bind `resource`.
    async fn login(
        &mut self,
        username: &str,
        password: &str,
        resource: &str,
    ) -> Result<(), TransportError>;

    /// Open (or reuse) a one-to-one chat.
    async fn open_direct_chat(&mut self, jid: &str) -> Result<ChatHandle, TransportError>;

    /// Join a chat room under `nickname`.
    async fn join_room(
        &mut self,
        jid: &str,
        nickname: &str,
        password: Option<&str>,
    ) -> Result<ChatHandle, TransportError>;

    /// Send a text message.
    async fn send(&mut self, handle: &ChatHandle, text: &str) -> Result<(), TransportError>;

    /// Close the session. Errors are logged, not returned.
    async fn disconnect(&mut self);
}
