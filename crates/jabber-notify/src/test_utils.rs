use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::transport::{ChatHandle, ConnectOptions, Session, Transport};

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Step at which a [`RecordingTransport`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Connect,
    Login,
    Send,
}

/// Everything a [`RecordingTransport`] and its sessions were asked to do.
#[derive(Default)]
pub struct CallLog {
    connects: AtomicU32,
    logins: AtomicU32,
    disconnects: AtomicU32,
    options: Mutex<Option<ConnectOptions>>,
    direct_chats: Mutex<Vec<String>>,
    rooms: Mutex<Vec<(String, String, Option<String>)>>,
    sent: Mutex<Vec<String>>,
    disconnected_at: Mutex<Option<Instant>>,
}

impl CallLog {
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.options.lock().unwrap().clone()
    }

    pub fn direct_chats(&self) -> Vec<String> {
        self.direct_chats.lock().unwrap().clone()
    }

    pub fn rooms(&self) -> Vec<(String, String, Option<String>)> {
        self.rooms.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn disconnected_at(&self) -> Option<Instant> {
        *self.disconnected_at.lock().unwrap()
    }
}

/// In-memory transport that records calls and can fail at one step.
pub struct RecordingTransport {
    calls: Arc<CallLog>,
    failure: Option<Failure>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(CallLog::default()),
            failure: None,
        }
    }

    pub fn failing(failure: Failure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Arc<CallLog> {
        self.calls.clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Session>, TransportError> {
        self.calls.connects.fetch_add(1, Ordering::SeqCst);
        *self.calls.options.lock().unwrap() = Some(options.clone());
        if self.failure == Some(Failure::Connect) {
            return Err(TransportError::connection("connection refused"));
        }
        Ok(Box::new(RecordingSession {
            calls: self.calls.clone(),
            failure: self.failure,
        }))
    }
}

struct RecordingSession {
    calls: Arc<CallLog>,
    failure: Option<Failure>,
}

#[async_trait]
impl Session for RecordingSession {
    async fn login(
        &mut self,
        _username: &str,
        _password: &str,
        _resource: &str,
    ) -> Result<(), TransportError> {
        self.calls.logins.fetch_add(1, Ordering::SeqCst);
        if self.failure == Some(Failure::Login) {
            return Err(TransportError::auth("not-authorized"));
        }
        Ok(())
    }

    async fn open_direct_chat(&mut self, jid: &str) -> Result<ChatHandle, TransportError> {
        self.calls.direct_chats.lock().unwrap().push(jid.to_string());
        Ok(ChatHandle::Direct {
            jid: jid.to_string(),
            thread: "thread-1".to_string(),
        })
    }

    async fn join_room(
        &mut self,
        jid: &str,
        nickname: &str,
        password: Option<&str>,
    ) -> Result<ChatHandle, TransportError> {
        self.calls.rooms.lock().unwrap().push((
            jid.to_string(),
            nickname.to_string(),
            password.map(str::to_string),
        ));
        Ok(ChatHandle::Room {
            jid: jid.to_string(),
            nickname: nickname.to_string(),
        })
    }

    async fn send(&mut self, _handle: &ChatHandle, text: &str) -> Result<(), TransportError> {
        if self.failure == Some(Failure::Send) {
            return Err(TransportError::StreamClosed);
        }
        self.calls.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.calls.disconnects.fetch_add(1, Ordering::SeqCst);
        *self.calls.disconnected_at.lock().unwrap() = Some(Instant::now());
    }
}
