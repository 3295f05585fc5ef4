//! XMPP client transport over TCP.
//!
//! Implements the client side of RFC 6120 needed to deliver one message:
//! stream setup, STARTTLS, SASL PLAIN, resource binding, optional legacy
//! session establishment, and XEP-0045 room joins.

mod stanza;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use self::stanza::{Element, XmppIo, XmppStream};
use super::{ChatHandle, ConnectOptions, Session, Transport};
use crate::error::TransportError;

/// Timeout for the TCP connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the room's answer to a join presence.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for any other server reply, including the TLS handshake.
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Await a server reply, failing with a connection error after [`REPLY_TIMEOUT`].
async fn reply<T, F>(waiting_for: &str, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::time::timeout(REPLY_TIMEOUT, fut)
        .await
        .map_err(|_| TransportError::connection(format!("timed out waiting for {waiting_for}")))?
}

/// XMPP transport backed by `tokio` TCP and `rustls`.
#[derive(Clone)]
pub struct XmppTransport {
    tls: Option<TlsConnector>,
}

impl XmppTransport {
    /// Create a transport trusting the Mozilla root store.
    pub fn new() -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self {
            tls: Some(TlsConnector::from(Arc::new(config))),
        }
    }

    /// Create a transport with a custom TLS client configuration.
    pub fn with_tls_config(config: Arc<ClientConfig>) -> Self {
        Self {
            tls: Some(TlsConnector::from(config)),
        }
    }

    /// Create a transport that never upgrades to TLS.
    ///
    /// Servers that require STARTTLS will reject the session.
    pub fn plaintext() -> Self {
        Self { tls: None }
    }
}

impl Default for XmppTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for XmppTransport {
    fn name(&self) -> &'static str {
        "xmpp"
    }

    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Session>, TransportError> {
        let addr = (options.host.as_str(), options.port);
        let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                TransportError::connection(format!(
                    "timed out connecting to {}:{}",
                    options.host, options.port
                ))
            })?
            .map_err(|e| {
                TransportError::connection(format!(
                    "{}:{}: {e}",
                    options.host, options.port
                ))
            })?;
        tcp.set_nodelay(true)?;

        debug!(host = %options.host, port = options.port, "TCP connection established");

        let mut session = XmppSession::new(Box::new(tcp), options.clone(), self.tls.clone());
        session.negotiate().await?;
        Ok(Box::new(session))
    }
}

/// One XMPP client stream.
struct XmppSession {
    /// `None` once disconnected.
    stream: Option<XmppStream>,
    options: ConnectOptions,
    tls: Option<TlsConnector>,
    features: Element,
    secure: bool,
    bound_jid: Option<String>,
    chats: HashMap<String, ChatHandle>,
    next_id: u64,
}

impl XmppSession {
    fn new(io: Box<dyn XmppIo>, options: ConnectOptions, tls: Option<TlsConnector>) -> Self {
        Self {
            stream: Some(XmppStream::new(io)),
            options,
            tls,
            features: Element::default(),
            secure: false,
            bound_jid: None,
            chats: HashMap::new(),
            next_id: 0,
        }
    }

    fn stream(&mut self) -> Result<&mut XmppStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::StreamClosed)
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Open the stream and upgrade to TLS when offered.
    async fn negotiate(&mut self) -> Result<(), TransportError> {
        self.restart_stream().await?;

        if let Some(starttls) = self.features.child("starttls") {
            let required = starttls.has_child("required");
            if self.tls.is_some() {
                self.start_tls().await?;
                self.restart_stream().await?;
            } else if required {
                return Err(TransportError::connection(
                    "server requires STARTTLS but TLS is disabled",
                ));
            }
        }

        if self.options.compression && self.features.has_child("compression") {
            debug!("Server offers stream compression; continuing uncompressed");
        }

        Ok(())
    }

    /// Send a stream header and read the server's header and features.
    async fn restart_stream(&mut self) -> Result<(), TransportError> {
        let header = stanza::stream_header(&self.options.domain);
        let stream = self.stream()?;
        stream.write(&header).await?;

        let header = reply("stream header", stream.read_element()).await?;
        if header.name != "stream" {
            return Err(TransportError::protocol(format!(
                "expected stream header, got <{}>",
                header.name
            )));
        }

        let features = reply("stream features", stream.read_element()).await?;
        if features.name != "features" {
            return Err(TransportError::protocol(format!(
                "expected stream features, got <{}>",
                features.name
            )));
        }
        self.features = features;
        Ok(())
    }

    async fn start_tls(&mut self) -> Result<(), TransportError> {
        let stream = self.stream()?;
        stream.write(&stanza::starttls()).await?;
        let answer = reply("STARTTLS answer", stream.read_element()).await?;
        match answer.name.as_str() {
            "proceed" => {}
            "failure" => return Err(TransportError::connection("server refused STARTTLS")),
            other => {
                return Err(TransportError::protocol(format!(
                    "unexpected <{other}> in reply to STARTTLS"
                )));
            }
        }

        let connector = self
            .tls
            .clone()
            .ok_or_else(|| TransportError::connection("TLS is disabled"))?;
        let server_name = ServerName::try_from(self.options.domain.clone()).map_err(|e| {
            TransportError::connection(format!("invalid TLS server name: {e}"))
        })?;

        let io = self
            .stream
            .take()
            .ok_or(TransportError::StreamClosed)?
            .into_inner();
        let tls = reply("TLS handshake", async move {
            connector
                .connect(server_name, io)
                .await
                .map_err(|e| TransportError::connection(format!("TLS handshake failed: {e}")))
        })
        .await?;

        self.stream = Some(XmppStream::new(Box::new(tls)));
        self.secure = true;
        debug!(domain = %self.options.domain, "Stream upgraded to TLS");
        Ok(())
    }

    /// Wait for the `result` to the iq `id`; other stanzas are skipped.
    async fn await_iq(&mut self, id: &str) -> Result<Element, TransportError> {
        let stream = self.stream()?;
        let waiting_for = format!("iq {id}");
        reply(&waiting_for, async move {
            loop {
                let element = stream.read_element().await?;
                if element.name != "iq" || element.attr("id") != Some(id) {
                    debug!(name = %element.name, "Skipping stanza while waiting for iq {}", id);
                    continue;
                }
                return match element.attr("type") {
                    Some("result") => Ok(element),
                    _ => Err(TransportError::protocol(format!(
                        "iq {id} failed: {}",
                        element.condition().unwrap_or("undefined-condition")
                    ))),
                };
            }
        })
        .await
    }

    async fn bind(&mut self, resource: &str) -> Result<(), TransportError> {
        if !self.features.has_child("bind") {
            return Err(TransportError::auth("server does not offer resource binding"));
        }

        let id = self.next_id("bind");
        self.stream()?.write(&stanza::bind(&id, resource)).await?;
        let result = self
            .await_iq(&id)
            .await
            .map_err(|e| TransportError::auth(format!("resource binding failed: {e}")))?;

        let jid = result
            .child("bind")
            .and_then(|b| b.child("jid"))
            .map(|j| j.text.trim().to_string())
            .filter(|j| !j.is_empty())
            .ok_or_else(|| TransportError::protocol("bind result carries no jid"))?;

        // RFC 3921 servers still expect an explicit session unless marked optional.
        let session_required = self
            .features
            .child("session")
            .is_some_and(|s| !s.has_child("optional"));
        if session_required {
            let id = self.next_id("sess");
            self.stream()?.write(&stanza::session(&id)).await?;
            self.await_iq(&id).await?;
        }

        debug!(jid = %jid, "Resource bound");
        self.bound_jid = Some(jid);
        Ok(())
    }

    /// Wait for the room's presence for our occupant JID.
    async fn await_room_presence(&mut self, room: &str, occupant: &str) -> Result<(), TransportError> {
        let stream = self.stream()?;
        loop {
            let element = stream.read_element().await?;
            if element.name != "presence" {
                continue;
            }
            let Some(from) = element.attr("from") else {
                continue;
            };
            if !from.eq_ignore_ascii_case(occupant) {
                continue;
            }
            if element.attr("type") == Some("error") {
                return Err(TransportError::room(
                    room,
                    element.condition().unwrap_or("undefined-condition"),
                ));
            }
            return Ok(());
        }
    }

    fn ensure_bound(&self) -> Result<(), TransportError> {
        if self.bound_jid.is_none() {
            return Err(TransportError::protocol("session is not logged in"));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for XmppSession {
    async fn login(
        &mut self,
        username: &str,
        password: &str,
        resource: &str,
    ) -> Result<(), TransportError> {
        if !self.options.sasl {
            return Err(TransportError::auth("non-SASL authentication is not supported"));
        }

        let plain_offered = self.features.child("mechanisms").is_some_and(|m| {
            m.children
                .iter()
                .any(|c| c.name == "mechanism" && c.text.trim().eq_ignore_ascii_case("PLAIN"))
        });
        if !plain_offered {
            return Err(TransportError::auth("server does not offer SASL PLAIN"));
        }
        if !self.secure {
            warn!(host = %self.options.host, "Authenticating over an unencrypted stream");
        }

        let stream = self.stream()?;
        stream.write(&stanza::sasl_plain(username, password)).await?;
        let answer = reply("SASL answer", stream.read_element()).await?;
        match answer.name.as_str() {
            "success" => {}
            "failure" => {
                return Err(TransportError::auth(
                    answer.condition().unwrap_or("undefined-condition"),
                ));
            }
            other => {
                return Err(TransportError::protocol(format!(
                    "unexpected <{other}> in reply to SASL auth"
                )));
            }
        }

        self.restart_stream().await?;
        self.bind(resource).await?;
        info!(
            host = %self.options.host,
            jid = self.bound_jid.as_deref().unwrap_or_default(),
            "Logged in"
        );
        Ok(())
    }

    async fn open_direct_chat(&mut self, jid: &str) -> Result<ChatHandle, TransportError> {
        self.ensure_bound()?;
        let handle = self
            .chats
            .entry(jid.to_string())
            .or_insert_with(|| ChatHandle::Direct {
                jid: jid.to_string(),
                thread: Uuid::new_v4().simple().to_string(),
            })
            .clone();
        Ok(handle)
    }

    async fn join_room(
        &mut self,
        jid: &str,
        nickname: &str,
        password: Option<&str>,
    ) -> Result<ChatHandle, TransportError> {
        self.ensure_bound()?;
        let occupant = format!("{jid}/{nickname}");
        self.stream()?
            .write(&stanza::muc_join(&occupant, password))
            .await?;

        tokio::time::timeout(JOIN_TIMEOUT, self.await_room_presence(jid, &occupant))
            .await
            .map_err(|_| TransportError::room(jid, "timed out waiting for room presence"))??;

        debug!(room = %jid, nickname = %nickname, "Joined room");
        Ok(ChatHandle::Room {
            jid: jid.to_string(),
            nickname: nickname.to_string(),
        })
    }

    async fn send(&mut self, handle: &ChatHandle, text: &str) -> Result<(), TransportError> {
        self.ensure_bound()?;
        let id = self.next_id("msg");
        let stanza = match handle {
            ChatHandle::Direct { jid, thread } => stanza::chat_message(&id, jid, thread, text),
            ChatHandle::Room { jid, .. } => stanza::groupchat_message(&id, jid, text),
        };
        self.stream()?.write(&stanza).await
    }

    async fn disconnect(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };

        let mut closing = String::new();
        if self.bound_jid.is_some() {
            closing.push_str(stanza::UNAVAILABLE_PRESENCE);
        }
        closing.push_str(stanza::STREAM_CLOSE);

        if let Err(e) = stream.write(&closing).await {
            debug!("Failed to close XMPP stream cleanly: {}", e);
        }
        if let Err(e) = stream.into_inner().shutdown().await {
            debug!("Failed to shut down XMPP socket: {}", e);
        }
        info!(host = %self.options.host, "Disconnected");
    }
}
