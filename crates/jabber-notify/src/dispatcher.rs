//! Notification dispatcher.
//!
//! One dispatch walks `Idle → Connecting → Authenticated → Delivering →
//! Disconnecting → Closed`. Transport failures are logged and reported as an
//! undelivered result; they never escape the dispatcher. The session is always
//! closed once it was opened, either inline (zero delay) or by a spawned task
//! after the configured delay.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConnectionConfig, DeliveryTarget};
use crate::error::TransportError;
use crate::event::ExecutionEvent;
use crate::formatter::format_message;
use crate::transport::{ConnectOptions, Session, Transport};

/// Lifecycle of a single dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Connecting,
    Authenticated,
    Delivering,
    Disconnecting,
    Closed,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Delivering => "delivering",
            Self::Disconnecting => "disconnecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Handle to a deferred disconnect.
///
/// Dropping the handle detaches the task; the disconnect still fires.
#[derive(Debug)]
pub struct ScheduledDisconnect {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    delay: Duration,
}

impl ScheduledDisconnect {
    fn spawn(mut session: Box<dyn Session>, delay: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => {
                    debug!("Deferred disconnect cancelled, closing session now");
                }
            }
            session.disconnect().await;
            debug!(state = %DispatchState::Closed, "Session closed");
        });

        Self {
            cancel,
            handle,
            delay,
        }
    }

    /// Delay the disconnect was scheduled with.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Skip the remaining delay and close the session immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the session has been closed.
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            warn!("Deferred disconnect task failed: {}", e);
        }
    }
}

/// Result of one dispatch.
#[derive(Debug)]
pub struct DispatchReport {
    /// Whether the message was handed to the transport.
    pub delivered: bool,
    /// State when `dispatch` returned: `Closed`, or `Disconnecting` while a
    /// deferred disconnect is pending.
    pub state: DispatchState,
    /// The transport failure, if any.
    pub error: Option<TransportError>,
    /// Pending disconnect, when the delay is non-zero and a session was opened.
    pub disconnect: Option<ScheduledDisconnect>,
}

/// Delivers one formatted notification per call.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        Self { transport, config }
    }

    /// Send the notification; `true` when delivered.
    ///
    /// Returns before a non-zero disconnect delay has elapsed.
    pub async fn notify(&self, trigger: &str, event: &ExecutionEvent) -> bool {
        self.dispatch(trigger, event).await.delivered
    }

    /// Send the notification and report the outcome in detail.
    pub async fn dispatch(&self, trigger: &str, event: &ExecutionEvent) -> DispatchReport {
        let mut state = DispatchState::Idle;
        let target = self.config.target();

        // Compression and SASL are requested by default.
        let options = ConnectOptions::new(
            self.config.hostname(),
            self.config.port(),
            self.config.service_domain(),
        );

        self.advance(&mut state, DispatchState::Connecting);
        let mut session = match self.transport.connect(&options).await {
            Ok(session) => session,
            Err(e) => {
                error!(
                    transport = self.transport.name(),
                    host = %options.host,
                    port = options.port,
                    "Failed to connect: {}", e
                );
                self.advance(&mut state, DispatchState::Closed);
                return DispatchReport {
                    delivered: false,
                    state,
                    error: Some(e),
                    disconnect: None,
                };
            }
        };

        let result = self
            .deliver(&mut state, session.as_mut(), trigger, event)
            .await;

        let error = match result {
            Ok(()) => {
                info!(
                    trigger = %trigger,
                    target = %target.id(),
                    kind = target.kind(),
                    "Notification delivered"
                );
                None
            }
            Err(e) => {
                error!(
                    trigger = %trigger,
                    target = %target.id(),
                    kind = target.kind(),
                    state = %state,
                    "Notification delivery failed: {}", e
                );
                Some(e)
            }
        };

        self.advance(&mut state, DispatchState::Disconnecting);
        let disconnect = self.close(session, &mut state).await;

        DispatchReport {
            delivered: error.is_none(),
            state,
            error,
            disconnect,
        }
    }

    async fn deliver(
        &self,
        state: &mut DispatchState,
        session: &mut dyn Session,
        trigger: &str,
        event: &ExecutionEvent,
    ) -> Result<(), TransportError> {
        session
            .login(
                self.config.auth_username(),
                self.config.password(),
                self.config.resource_name(),
            )
            .await?;
        self.advance(state, DispatchState::Authenticated);

        let text = format_message(trigger, event);

        self.advance(state, DispatchState::Delivering);
        let handle = match self.config.target() {
            DeliveryTarget::Direct { id } => session.open_direct_chat(id).await?,
            DeliveryTarget::Room {
                id,
                nickname,
                password,
            } => session.join_room(id, nickname, password.as_deref()).await?,
        };

        session.send(&handle, &text).await
    }

    async fn close(
        &self,
        mut session: Box<dyn Session>,
        state: &mut DispatchState,
    ) -> Option<ScheduledDisconnect> {
        let delay = self.config.disconnect_delay();
        if delay.is_zero() {
            session.disconnect().await;
            self.advance(state, DispatchState::Closed);
            return None;
        }

        debug!(delay_ms = self.config.disconnect_delay_ms(), "Scheduling disconnect");
        Some(ScheduledDisconnect::spawn(session, delay))
    }

    fn advance(&self, state: &mut DispatchState, next: DispatchState) {
        debug!(from = %state, to = %next, "Dispatch state");
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationSettings;
    use crate::event::JobRef;
    use crate::test_utils::{Failure, RecordingTransport, init_tracing};
    use tokio::time::Instant;

    fn config(delay_ms: u64) -> ConnectionConfig {
        NotificationSettings {
            hostname: Some("jabber.example.com".to_string()),
            port: Some(5222),
            username: Some("notifier".to_string()),
            password: Some("secret".to_string()),
            jabber_id: Some("ops@example.com".to_string()),
            disconnect_delay: Some(delay_ms),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    fn room_config() -> ConnectionConfig {
        NotificationSettings {
            hostname: Some("jabber.example.com".to_string()),
            port: Some(5222),
            username: Some("notifier".to_string()),
            password: Some("secret".to_string()),
            chatroom_jabber_id: Some("builds@conference.example.com".to_string()),
            chatroom_nickname: Some("ci".to_string()),
            chatroom_password: Some("letmein".to_string()),
            disconnect_delay: Some(0),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    fn event() -> ExecutionEvent {
        ExecutionEvent::new(
            "alice",
            "http://x/1",
            JobRef::new("build", Some("infra".to_string())),
        )
    }

    #[tokio::test]
    async fn test_direct_delivery() {
        init_tracing();
        let transport = RecordingTransport::new();
        let calls = transport.calls();
        let dispatcher = Dispatcher::new(Arc::new(transport), config(0));

        let report = dispatcher.dispatch("success", &event()).await;

        assert!(report.delivered);
        assert!(report.error.is_none());
        assert!(report.disconnect.is_none());
        assert_eq!(report.state, DispatchState::Closed);

        assert_eq!(calls.connects(), 1);
        assert_eq!(calls.logins(), 1);
        assert_eq!(calls.direct_chats(), vec!["ops@example.com".to_string()]);
        assert_eq!(
            calls.sent(),
            vec!["[SUCCESS] infra/build run by alice: http://x/1".to_string()]
        );
        assert_eq!(calls.disconnects(), 1);

        let options = calls.last_options().unwrap();
        assert_eq!(options.host, "jabber.example.com");
        assert_eq!(options.port, 5222);
        assert!(options.compression);
        assert!(options.sasl);
    }

    #[tokio::test]
    async fn test_room_delivery() {
        let transport = RecordingTransport::new();
        let calls = transport.calls();
        let dispatcher = Dispatcher::new(Arc::new(transport), room_config());

        assert!(dispatcher.notify("start", &event()).await);

        assert!(calls.direct_chats().is_empty());
        assert_eq!(
            calls.rooms(),
            vec![(
                "builds@conference.example.com".to_string(),
                "ci".to_string(),
                Some("letmein".to_string())
            )]
        );
        assert_eq!(calls.sent().len(), 1);
        assert_eq!(calls.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_login_failure_still_disconnects() {
        let transport = RecordingTransport::failing(Failure::Login);
        let calls = transport.calls();
        let dispatcher = Dispatcher::new(Arc::new(transport), config(0));

        let report = dispatcher.dispatch("failure", &event()).await;

        assert!(!report.delivered);
        assert!(matches!(report.error, Some(TransportError::Auth(_))));
        assert_eq!(report.state, DispatchState::Closed);
        assert!(calls.sent().is_empty());
        assert_eq!(calls.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_failure_deferred_disconnect() {
        let transport = RecordingTransport::failing(Failure::Login);
        let calls = transport.calls();
        let dispatcher = Dispatcher::new(Arc::new(transport), config(1000));

        assert!(!dispatcher.notify("failure", &event()).await);
        assert_eq!(calls.disconnects(), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(calls.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_still_disconnects() {
        let transport = RecordingTransport::failing(Failure::Send);
        let calls = transport.calls();
        let dispatcher = Dispatcher::new(Arc::new(transport), config(0));

        assert!(!dispatcher.notify("success", &event()).await);
        assert_eq!(calls.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let transport = RecordingTransport::failing(Failure::Connect);
        let calls = transport.calls();
        let dispatcher = Dispatcher::new(Arc::new(transport), config(0));

        let report = dispatcher.dispatch("success", &event()).await;

        assert!(!report.delivered);
        assert!(matches!(report.error, Some(TransportError::Connection(_))));
        assert_eq!(report.state, DispatchState::Closed);
        assert_eq!(calls.logins(), 0);
        assert_eq!(calls.disconnects(), 0);
    }

    #[tokio::test]
    async fn test_zero_delay_disconnects_before_return() {
        let transport = RecordingTransport::new();
        let calls = transport.calls();
        let dispatcher = Dispatcher::new(Arc::new(transport), config(0));

        assert!(dispatcher.notify("success", &event()).await);
        assert_eq!(calls.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_disconnect_fires_after_delay() {
        let transport = RecordingTransport::new();
        let calls = transport.calls();
        let dispatcher = Dispatcher::new(Arc::new(transport), config(5000));

        let start = Instant::now();
        let report = dispatcher.dispatch("success", &event()).await;

        assert!(report.delivered);
        assert_eq!(report.state, DispatchState::Disconnecting);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(calls.disconnects(), 0);

        let disconnect = report.disconnect.unwrap();
        assert_eq!(disconnect.delay(), Duration::from_millis(5000));
        disconnect.wait().await;

        assert_eq!(calls.disconnects(), 1);
        let fired_at = calls.disconnected_at().unwrap();
        assert_eq!(fired_at - start, Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_detaches_disconnect() {
        let transport = RecordingTransport::new();
        let calls = transport.calls();
        let dispatcher = Dispatcher::new(Arc::new(transport), config(5000));

        let start = Instant::now();
        assert!(dispatcher.notify("success", &event()).await);
        assert_eq!(calls.disconnects(), 0);

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert_eq!(calls.disconnects(), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(calls.disconnects(), 1);
        assert_eq!(
            calls.disconnected_at().unwrap() - start,
            Duration::from_millis(5000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_closes_immediately() {
        let transport = RecordingTransport::new();
        let calls = transport.calls();
        let dispatcher = Dispatcher::new(Arc::new(transport), config(5000));

        let start = Instant::now();
        let disconnect = dispatcher
            .dispatch("success", &event())
            .await
            .disconnect
            .unwrap();
        disconnect.cancel();
        disconnect.wait().await;

        assert_eq!(calls.disconnects(), 1);
        assert!(calls.disconnected_at().unwrap() - start < Duration::from_millis(5000));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(DispatchState::Authenticated.to_string(), "authenticated");
        assert_eq!(DispatchState::Closed.to_string(), "closed");
    }
}
