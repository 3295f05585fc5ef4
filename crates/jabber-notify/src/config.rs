//! Notification settings and their validated form.
//!
//! Hosts hand settings over as a flat property map keyed by the plugin's
//! property names. [`NotificationSettings`] mirrors that map; validation
//! turns it into an immutable [`ConnectionConfig`] or a [`ConfigError`].

use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Resource name used when logging in, unless overridden.
pub const DEFAULT_RESOURCE_NAME: &str = "rundeck";

/// Nickname used when joining a chat room, unless overridden.
pub const DEFAULT_ROOM_NICKNAME: &str = "rundeck";

/// Delay before closing the connection after delivery.
pub const DEFAULT_DISCONNECT_DELAY_MS: u64 = 10_000;

/// Standard XMPP client port, for hosts that pre-fill property defaults.
pub const DEFAULT_PORT: u16 = 5222;

/// Environment variables read by [`NotificationSettings::from_env`].
const ENV_KEYS: &[(&str, &str)] = &[
    ("JABBER_HOSTNAME", "hostname"),
    ("JABBER_PORT", "port"),
    ("JABBER_USERNAME", "username"),
    ("JABBER_PASSWORD", "password"),
    ("JABBER_RESOURCE_NAME", "resourceName"),
    ("JABBER_ID", "jabberId"),
    ("JABBER_DISCONNECT_DELAY", "disconnectDelay"),
    ("JABBER_CHATROOM_ID", "chatroomJabberId"),
    ("JABBER_CHATROOM_NICKNAME", "chatroomNickname"),
    ("JABBER_CHATROOM_PASSWORD", "chatroomPassword"),
];

/// Raw, unvalidated notification settings.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    /// Jabber server hostname.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Jabber server port.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub port: Option<u64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Resource used when logging in (default: `rundeck`).
    #[serde(default)]
    pub resource_name: Option<String>,
    /// Jabber ID of a single recipient.
    #[serde(default)]
    pub jabber_id: Option<String>,
    /// Milliseconds to wait after sending before disconnecting.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub disconnect_delay: Option<u64>,
    /// Jabber ID of a multi-user chat room.
    #[serde(default)]
    pub chatroom_jabber_id: Option<String>,
    #[serde(default)]
    pub chatroom_nickname: Option<String>,
    #[serde(default)]
    pub chatroom_password: Option<String>,
}

/// Accepts `5222`, `"5222"` or a blank string.
fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse()
                .map(Some)
                .map_err(|_| de::Error::custom(format!("expected a number, got `{s}`")))
        }
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn sanitize(secret: Option<&str>) -> &'static str {
    if is_blank(secret) { "(unset)" } else { "***" }
}

impl NotificationSettings {
    /// Build settings from a host-supplied property map.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, ConfigError> {
        serde_json::from_value(Value::Object(map.clone()))
            .map_err(|e| ConfigError::invalid("configuration", e.to_string()))
    }

    /// Build settings from `JABBER_*` environment variables, loading `.env` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build settings from `JABBER_*` key/value pairs; unrelated keys are ignored.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut map = Map::new();
        for (key, value) in vars {
            if let Some((_, property)) = ENV_KEYS.iter().find(|(env, _)| *env == key) {
                map.insert((*property).to_string(), Value::String(value));
            }
        }
        Self::from_map(&map)
    }

    /// Validate the settings.
    ///
    /// Checks run in order: hostname, port, target, credentials.
    pub fn validate(&self) -> Result<ConnectionConfig, ConfigError> {
        let hostname =
            non_blank(self.hostname.as_deref()).ok_or(ConfigError::MissingHostname)?;

        let port = match self.port {
            None | Some(0) => return Err(ConfigError::MissingPort),
            Some(p) => u16::try_from(p)
                .map_err(|_| ConfigError::invalid("port", format!("{p} is out of range")))?,
        };

        let target = if let Some(id) = non_blank(self.jabber_id.as_deref()) {
            DeliveryTarget::Direct { id }
        } else if let Some(id) = non_blank(self.chatroom_jabber_id.as_deref()) {
            DeliveryTarget::Room {
                id,
                nickname: non_blank(self.chatroom_nickname.as_deref())
                    .unwrap_or_else(|| DEFAULT_ROOM_NICKNAME.to_string()),
                password: non_blank(self.chatroom_password.as_deref()),
            }
        } else {
            return Err(ConfigError::NoTarget);
        };

        if is_blank(self.username.as_deref()) || is_blank(self.password.as_deref()) {
            return Err(ConfigError::MissingCredentials);
        }

        Ok(ConnectionConfig {
            hostname,
            port,
            username: self.username.clone().unwrap_or_default().trim().to_string(),
            password: self.password.clone().unwrap_or_default(),
            resource_name: non_blank(self.resource_name.as_deref())
                .unwrap_or_else(|| DEFAULT_RESOURCE_NAME.to_string()),
            disconnect_delay_ms: self.disconnect_delay.unwrap_or(DEFAULT_DISCONNECT_DELAY_MS),
            target,
        })
    }
}

impl fmt::Debug for NotificationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationSettings")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &sanitize(self.password.as_deref()))
            .field("resource_name", &self.resource_name)
            .field("jabber_id", &self.jabber_id)
            .field("disconnect_delay", &self.disconnect_delay)
            .field("chatroom_jabber_id", &self.chatroom_jabber_id)
            .field("chatroom_nickname", &self.chatroom_nickname)
            .field(
                "chatroom_password",
                &sanitize(self.chatroom_password.as_deref()),
            )
            .finish()
    }
}

/// Where a notification is delivered.
#[derive(Clone, PartialEq, Eq)]
pub enum DeliveryTarget {
    /// A single recipient.
    Direct { id: String },
    /// A multi-user chat room, joined under `nickname`.
    Room {
        id: String,
        nickname: String,
        password: Option<String>,
    },
}

impl DeliveryTarget {
    /// The recipient or room Jabber ID.
    pub fn id(&self) -> &str {
        match self {
            Self::Direct { id } | Self::Room { id, .. } => id,
        }
    }

    /// Target kind name, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Direct { .. } => "direct",
            Self::Room { .. } => "room",
        }
    }
}

impl fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { id } => f.debug_struct("Direct").field("id", id).finish(),
            Self::Room {
                id,
                nickname,
                password,
            } => f
                .debug_struct("Room")
                .field("id", id)
                .field("nickname", nickname)
                .field("password", &sanitize(password.as_deref()))
                .finish(),
        }
    }
}

/// Validated connection configuration for one notification.
#[derive(Clone)]
pub struct ConnectionConfig {
    hostname: String,
    port: u16,
    username: String,
    password: String,
    resource_name: String,
    disconnect_delay_ms: u64,
    target: DeliveryTarget,
}

impl ConnectionConfig {
    /// Validate raw settings; same as [`NotificationSettings::validate`].
    pub fn validate(raw: &NotificationSettings) -> Result<Self, ConfigError> {
        raw.validate()
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn disconnect_delay_ms(&self) -> u64 {
        self.disconnect_delay_ms
    }

    pub fn disconnect_delay(&self) -> Duration {
        Duration::from_millis(self.disconnect_delay_ms)
    }

    pub fn target(&self) -> &DeliveryTarget {
        &self.target
    }

    /// XMPP service domain: the domain part of the username, else the hostname.
    pub fn service_domain(&self) -> &str {
        match self.username.split_once('@') {
            Some((_, domain)) if !domain.is_empty() => {
                domain.split('/').next().unwrap_or(domain)
            }
            _ => &self.hostname,
        }
    }

    /// Local part used for SASL authentication.
    pub fn auth_username(&self) -> &str {
        self.username
            .split_once('@')
            .map_or(self.username.as_str(), |(local, _)| local)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &sanitize(Some(&self.password)))
            .field("resource_name", &self.resource_name)
            .field("disconnect_delay_ms", &self.disconnect_delay_ms)
            .field("target", &self.target)
            .finish()
    }
}
