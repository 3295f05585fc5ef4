//! XMPP stream framing: a minimal element tree, an async element reader and
//! the outgoing stanzas the session needs.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::error::TransportError;

const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
const NS_TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
const NS_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
const NS_SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
const NS_MUC: &str = "http://jabber.org/protocol/muc";

/// Byte stream an XMPP session runs over (plain TCP or TLS).
pub(crate) trait XmppIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> XmppIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A parsed element. Names are local names; attribute keys are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, TransportError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| TransportError::protocol(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| TransportError::protocol(e.to_string()))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(Self {
            name,
            attrs,
            ..Default::default()
        })
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    /// Error condition carried by a `<failure/>`, `<stream:error/>` or an
    /// error stanza: the first child that is not `<text/>`.
    pub fn condition(&self) -> Option<&str> {
        let holder = self.child("error").unwrap_or(self);
        holder
            .children
            .iter()
            .find(|c| c.name != "text")
            .map(|c| c.name.as_str())
    }
}

/// Reads top-level stream children and writes raw stanzas.
pub(crate) struct XmppStream {
    reader: Reader<BufReader<Box<dyn XmppIo>>>,
}

impl XmppStream {
    pub fn new(io: Box<dyn XmppIo>) -> Self {
        let mut reader = Reader::from_reader(BufReader::new(io));
        let config = reader.config_mut();
        config.trim_text(true);
        // Stream restarts open a new <stream:stream> without closing the old one.
        config.check_end_names = false;
        Self { reader }
    }

    pub async fn write(&mut self, data: &str) -> Result<(), TransportError> {
        // Payload is not logged: <auth/> carries credentials.
        trace!(bytes = data.len(), "xmpp send");
        let io = self.reader.get_mut().get_mut();
        io.write_all(data.as_bytes()).await?;
        io.flush().await?;
        Ok(())
    }

    /// Read the next complete child of the stream root.
    ///
    /// A `<stream:stream>` header is returned as soon as it opens. A top-level
    /// `<stream:error/>` is turned into an error.
    pub async fn read_element(&mut self) -> Result<Element, TransportError> {
        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();

        loop {
            buf.clear();
            let event = self
                .reader
                .read_event_into_async(&mut buf)
                .await
                .map_err(|e| TransportError::protocol(e.to_string()))?;

            let complete = match event {
                Event::Start(start) => {
                    let element = Element::from_start(&start)?;
                    if stack.is_empty() && element.name == "stream" {
                        return Ok(element);
                    }
                    stack.push(element);
                    None
                }
                Event::Empty(start) => Some(Element::from_start(&start)?),
                Event::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        let text = text
                            .unescape()
                            .map_err(|e| TransportError::protocol(e.to_string()))?;
                        top.text.push_str(&text);
                    }
                    None
                }
                Event::CData(data) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&data));
                    }
                    None
                }
                Event::End(_) => match stack.pop() {
                    Some(element) => Some(element),
                    None => return Err(TransportError::StreamClosed),
                },
                Event::Eof => return Err(TransportError::StreamClosed),
                _ => None,
            };

            if let Some(element) = complete {
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => {
                        trace!(name = %element.name, "xmpp recv");
                        if element.name == "error" {
                            return Err(TransportError::protocol(format!(
                                "stream error: {}",
                                element.condition().unwrap_or("undefined-condition")
                            )));
                        }
                        return Ok(element);
                    }
                }
            }
        }
    }

    pub fn into_inner(self) -> Box<dyn XmppIo> {
        self.reader.into_inner().into_inner()
    }
}

pub(crate) fn stream_header(domain: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream xmlns='jabber:client' \
         xmlns:stream='http://etherx.jabber.org/streams' to='{}' version='1.0'>",
        escape(domain)
    )
}

pub(crate) const STREAM_CLOSE: &str = "</stream:stream>";

pub(crate) const UNAVAILABLE_PRESENCE: &str = "<presence type='unavailable'/>";

pub(crate) fn starttls() -> String {
    format!("<starttls xmlns='{NS_TLS}'/>")
}

/// SASL PLAIN: `authzid NUL authcid NUL password`, authzid left empty.
pub(crate) fn sasl_plain(username: &str, password: &str) -> String {
    let credentials = STANDARD.encode(format!("\0{username}\0{password}"));
    format!("<auth xmlns='{NS_SASL}' mechanism='PLAIN'>{credentials}</auth>")
}

pub(crate) fn bind(id: &str, resource: &str) -> String {
    format!(
        "<iq type='set' id='{}'><bind xmlns='{NS_BIND}'><resource>{}</resource></bind></iq>",
        escape(id),
        escape(resource)
    )
}

pub(crate) fn session(id: &str) -> String {
    format!(
        "<iq type='set' id='{}'><session xmlns='{NS_SESSION}'/></iq>",
        escape(id)
    )
}

pub(crate) fn chat_message(id: &str, to: &str, thread: &str, body: &str) -> String {
    format!(
        "<message type='chat' id='{}' to='{}'><body>{}</body><thread>{}</thread></message>",
        escape(id),
        escape(to),
        escape(body),
        escape(thread)
    )
}

pub(crate) fn groupchat_message(id: &str, to: &str, body: &str) -> String {
    format!(
        "<message type='groupchat' id='{}' to='{}'><body>{}</body></message>",
        escape(id),
        escape(to),
        escape(body)
    )
}

/// MUC join presence addressed to `room/nickname`. History is suppressed.
pub(crate) fn muc_join(occupant: &str, password: Option<&str>) -> String {
    let password = password
        .map(|p| format!("<password>{}</password>", escape(p)))
        .unwrap_or_default();
    format!(
        "<presence to='{}'><x xmlns='{NS_MUC}'><history maxstanzas='0'/>{password}</x></presence>",
        escape(occupant)
    )
}
