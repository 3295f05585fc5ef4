//! Host-facing notification entry point and plugin metadata.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{
    ConnectionConfig, DEFAULT_RESOURCE_NAME, DEFAULT_ROOM_NICKNAME, NotificationSettings,
};
use crate::dispatcher::Dispatcher;
use crate::error::{ConfigError, Result};
use crate::event::ExecutionEvent;
use crate::transport::{Transport, XmppTransport};

/// Provider name registered with the host.
pub const PLUGIN_NAME: &str = "jabber-xmpp";

/// Title shown by host UIs.
pub const PLUGIN_TITLE: &str = "Jabber";

/// One-line description shown by host UIs.
pub const PLUGIN_DESCRIPTION: &str = "Notify a Jabber ID or Chat room";

/// Where a host resolves a property from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyScope {
    /// Project-level setting, shared by every notification in a project.
    Project,
    /// Set on each notification.
    Instance,
}

/// Description of one configuration property, for host UIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub default_value: Option<&'static str>,
    pub scope: PropertyScope,
}

const fn property(
    name: &'static str,
    title: &'static str,
    description: &'static str,
    default_value: Option<&'static str>,
    scope: PropertyScope,
) -> PropertyDescriptor {
    PropertyDescriptor {
        name,
        title,
        description,
        default_value,
        scope,
    }
}

/// Every property understood by [`NotificationSettings`].
pub fn properties() -> Vec<PropertyDescriptor> {
    use PropertyScope::{Instance, Project};

    // Keep in sync with DEFAULT_PORT and DEFAULT_DISCONNECT_DELAY_MS.
    const PORT: &str = "5222";
    const DELAY: &str = "10000";

    vec![
        property("hostname", "Hostname", "Jabber server hostname", None, Project),
        property("port", "Port", "Jabber server port", Some(PORT), Project),
        property("username", "Username", "Username", None, Project),
        property("password", "Password", "Password", None, Project),
        property(
            "resourceName",
            "Resource name",
            "Name of the resource used when logging in, default: (rundeck)",
            Some(DEFAULT_RESOURCE_NAME),
            Instance,
        ),
        property(
            "jabberId",
            "Jabber ID",
            "Jabber ID of the message destination",
            None,
            Instance,
        ),
        property(
            "disconnectDelay",
            "Disconnect Delay",
            "Delay after sending messages to wait before disconnecting. Default: (10000ms).",
            Some(DELAY),
            Project,
        ),
        property(
            "chatroomJabberId",
            "Chat Room Jabber ID",
            "Jabber ID of a multi-user Chat room",
            None,
            Instance,
        ),
        property(
            "chatroomNickname",
            "Chat Room Nickname",
            "Nickname to use in the chat room",
            Some(DEFAULT_ROOM_NICKNAME),
            Instance,
        ),
        property(
            "chatroomPassword",
            "Chat Room Password",
            "Password to connect to the chat room",
            None,
            Instance,
        ),
    ]
}

/// Jabber notification provider.
///
/// Each call validates its configuration, then dispatches over a fresh session.
#[derive(Clone)]
pub struct JabberNotifier {
    transport: Arc<dyn Transport>,
}

impl JabberNotifier {
    /// Notifier using [`XmppTransport`].
    pub fn new() -> Self {
        Self::with_transport(Arc::new(XmppTransport::new()))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Deliver a notification for `trigger`.
    ///
    /// Returns `Err` for invalid configuration, before any network activity.
    /// Otherwise returns whether the message was delivered.
    pub async fn post_notification(
        &self,
        trigger: &str,
        execution_data: &Map<String, Value>,
        configuration: &Map<String, Value>,
    ) -> std::result::Result<bool, ConfigError> {
        let (config, event) = prepare(execution_data, configuration)?;
        Ok(Dispatcher::new(self.transport.clone(), config)
            .notify(trigger, &event)
            .await)
    }

    /// Like [`post_notification`](Self::post_notification), but a failed
    /// delivery is returned as the transport error that caused it.
    ///
    /// A pending disconnect is left to run in the background.
    pub async fn try_post_notification(
        &self,
        trigger: &str,
        execution_data: &Map<String, Value>,
        configuration: &Map<String, Value>,
    ) -> Result<()> {
        let (config, event) = prepare(execution_data, configuration)?;
        let report = Dispatcher::new(self.transport.clone(), config)
            .dispatch(trigger, &event)
            .await;

        match report.error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

fn prepare(
    execution_data: &Map<String, Value>,
    configuration: &Map<String, Value>,
) -> std::result::Result<(ConnectionConfig, ExecutionEvent), ConfigError> {
    let settings = NotificationSettings::from_map(configuration)?;
    debug!(plugin = PLUGIN_NAME, settings = ?settings, "Posting notification");

    let config = settings.validate()?;
    Ok((config, ExecutionEvent::from_execution_data(execution_data)))
}

impl Default for JabberNotifier {
    fn default() -> Self {
        Self::new()
    }
}
