//! Jabber notifications: job execution events delivered over XMPP.
//!
//! A notification is formatted into a single line of text and sent either to
//! one Jabber ID or to a multi-user chat room. The connection stays open for a
//! configurable delay after sending, then closes in the background.
//!
//! ## Core Types
//!
//! - [`NotificationSettings`] - Raw settings as handed over by a host
//! - [`ConnectionConfig`] - Validated settings with a resolved [`DeliveryTarget`]
//! - [`ExecutionEvent`] - The job execution being reported
//! - [`format_message`] - Renders the notification text
//!
//! ## Delivery
//!
//! - [`Dispatcher`] - Drives one notification through connect, login, send and disconnect
//! - [`ScheduledDisconnect`] - Handle to a deferred disconnect
//! - [`JabberNotifier`] - Host-facing entry point
//!
//! ## Transports
//!
//! - [`Transport`] / [`Session`] - Chat server capability used by the dispatcher
//! - [`XmppTransport`] - XMPP client over TCP with STARTTLS

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod formatter;
pub mod notifier;
pub mod transport;

#[cfg(test)]
mod test_utils;

pub use config::{
    ConnectionConfig, DEFAULT_DISCONNECT_DELAY_MS, DEFAULT_PORT, DEFAULT_RESOURCE_NAME,
    DEFAULT_ROOM_NICKNAME, DeliveryTarget, NotificationSettings,
};
pub use dispatcher::{DispatchReport, DispatchState, Dispatcher, ScheduledDisconnect};
pub use error::{ConfigError, Error, Result, TransportError};
pub use event::{ExecutionEvent, JobRef};
pub use formatter::format_message;
pub use notifier::{
    JabberNotifier, PLUGIN_DESCRIPTION, PLUGIN_NAME, PLUGIN_TITLE, PropertyDescriptor,
    PropertyScope, properties,
};
pub use transport::{ChatHandle, ConnectOptions, Session, Transport, XmppTransport};
