// Real-time transport: one socket bound to one conversation.
// Handles connect, authenticate, fixed-interval reconnect, close, typed sends
// and fan-out of decoded inbound frames to subscribers.

use futures::future::{self, BoxFuture, FutureExt, Shared};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub mod connector;
pub mod frames;
pub mod listeners;

pub use connector::{Connector, Link, LinkCommand, LinkEvent, WebSocketConnector};
pub use frames::{EventKind, InboundFrame, OutboundFrame};
pub use listeners::{Subscription, Topic};

use crate::error::TransportError;
use crate::models::{ConversationId, MessageId};
use listeners::Listeners;

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Fixed-interval reconnect: no backoff, no jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Scheme and authority of the socket server, e.g. `ws://localhost:8000`.
    pub ws_base_url: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            ws_base_url: "ws://localhost:8000".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Target {
    conversation_id: ConversationId,
    token: Option<String>,
}

type PendingConnect = Shared<BoxFuture<'static, Result<(), TransportError>>>;

struct Session {
    state: ReadyState,
    outbound: Option<mpsc::UnboundedSender<LinkCommand>>,
    // Bumped by every new connection attempt; tasks of older attempts check it and stand down
    generation: u64,
    attempts: u32,
    should_reconnect: bool,
    pending: Option<PendingConnect>,
    session_id: Option<Uuid>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    session: Mutex<Session>,
    listeners: Listeners,
}

/// Owned transport instance. Dropping it disconnects.
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    pub fn new(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        Transport {
            inner: Arc::new(Inner {
                connector,
                config,
                session: Mutex::new(Session {
                    state: ReadyState::Closed,
                    outbound: None,
                    generation: 0,
                    attempts: 0,
                    should_reconnect: true,
                    pending: None,
                    session_id: None,
                }),
                listeners: Listeners::default(),
            }),
        }
    }

    pub fn websocket(config: TransportConfig) -> Self {
        Self::new(config, Arc::new(WebSocketConnector))
    }

    /// Connect to a conversation's socket.
    ///
    /// Resolves immediately if a socket is already open, whatever its target: call
    /// [`Transport::disconnect`] before switching conversations. Concurrent callers
    /// during an attempt all await that same attempt.
    pub async fn connect(
        &self,
        conversation_id: ConversationId,
        token: Option<&str>,
    ) -> Result<(), TransportError> {
        let target = Target {
            conversation_id,
            token: token.map(str::to_string),
        };
        self.inner.begin_connect(target).await
    }

    /// Disable reconnect for this session, close the socket and drop every subscription.
    pub fn disconnect(&self) {
        {
            let mut session = self.inner.session();
            session.should_reconnect = false;
            session.pending = None;
            session.state = match session.outbound.take() {
                Some(outbound) => {
                    let _ = outbound.send(LinkCommand::Close);
                    ReadyState::Closing
                }
                None => ReadyState::Closed,
            };
            if let Some(id) = session.session_id {
                info!("Disconnecting socket session {}", id);
            }
        }
        self.inner.listeners.clear();
    }

    /// Best effort: frames sent while not open are logged and dropped.
    pub fn send(&self, frame: &OutboundFrame) {
        self.inner.send(frame);
    }

    pub fn send_message(&self, text: &str) {
        self.send(&OutboundFrame::ChatMessage {
            message: text.to_string(),
        });
    }

    pub fn send_file(&self, base64_data: &str, file_name: &str, mime_type: &str) {
        self.send(&OutboundFrame::FileMessage {
            file_data: base64_data.to_string(),
            file_name: file_name.to_string(),
            file_type: mime_type.to_string(),
        });
    }

    pub fn send_typing_start(&self) {
        self.send(&OutboundFrame::TypingStart);
    }

    pub fn send_typing_stop(&self) {
        self.send(&OutboundFrame::TypingStop);
    }

    pub fn mark_read(&self, message_id: MessageId) {
        self.send(&OutboundFrame::MarkRead { message_id });
    }

    pub fn add_event_listener<F>(&self, topic: impl Into<Topic>, callback: F) -> Subscription
    where
        F: Fn(&InboundFrame) + Send + Sync + 'static,
    {
        self.inner.listeners.add(topic.into(), Arc::new(callback))
    }

    pub fn is_connected(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.session().state
    }

    /// Automatic reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.session().attempts
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Session> {
        match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn url_for(&self, target: &Target) -> String {
        format!(
            "{}/ws/chat/{}/?token={}",
            self.config.ws_base_url.trim_end_matches('/'),
            target.conversation_id,
            urlencoding::encode(target.token.as_deref().unwrap_or(""))
        )
    }

    fn begin_connect(self: &Arc<Self>, target: Target) -> PendingConnect {
        let mut session = self.session();

        if session.state == ReadyState::Open {
            return future::ready(Ok(())).boxed().shared();
        }
        if let Some(pending) = &session.pending {
            debug!("Joining in-flight connection attempt");
            return pending.clone();
        }

        session.generation += 1;
        session.state = ReadyState::Connecting;
        session.should_reconnect = true;
        let generation = session.generation;

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.open_session(target, generation).await });
        let pending = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(TransportError::Aborted(e.to_string())),
            }
        }
        .boxed()
        .shared();

        // Stored before the lock is released, so the attempt cannot finish first
        session.pending = Some(pending.clone());
        pending
    }

    async fn open_session(
        self: Arc<Self>,
        target: Target,
        generation: u64,
    ) -> Result<(), TransportError> {
        let url = self.url_for(&target);
        info!("Opening socket for conversation {}", target.conversation_id);
        debug!("Socket URL: {}", url.split('?').next().unwrap_or(&url));

        let result = self.connector.open(&url).await;

        let mut session = self.session();
        let still_wanted =
            session.generation == generation && session.state == ReadyState::Connecting;

        match result {
            Ok(link) if still_wanted => {
                let session_id = Uuid::new_v4();
                session.state = ReadyState::Open;
                session.attempts = 0;
                session.pending = None;
                session.session_id = Some(session_id);
                session.outbound = Some(link.outbound.clone());
                drop(session);

                info!(
                    "Socket session {} connected to conversation {}",
                    session_id, target.conversation_id
                );

                if let Some(token) = &target.token {
                    let frame = OutboundFrame::Authenticate {
                        token: token.clone(),
                    };
                    match serde_json::to_string(&frame) {
                        Ok(text) => {
                            let _ = link.outbound.send(LinkCommand::Text(text));
                        }
                        Err(e) => error!("Failed to encode authenticate frame: {}", e),
                    }
                }

                let inner = Arc::clone(&self);
                tokio::spawn(inner.read_loop(link.inbound, target, generation));
                Ok(())
            }
            Ok(link) => {
                debug!("Discarding socket for superseded attempt {}", generation);
                let _ = link.outbound.send(LinkCommand::Close);
                Err(TransportError::Superseded)
            }
            Err(e) if still_wanted => {
                session.state = ReadyState::Closed;
                session.pending = None;
                drop(session);

                error!(
                    "Socket for conversation {} failed to open: {}",
                    target.conversation_id, e
                );
                self.schedule_reconnect(target, generation);
                Err(e)
            }
            Err(e) => {
                debug!("Superseded attempt {} failed: {}", generation, e);
                Err(TransportError::Superseded)
            }
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<LinkEvent>,
        target: Target,
        generation: u64,
    ) {
        let (code, reason) = loop {
            match inbound.recv().await {
                Some(LinkEvent::Text(text)) => {
                    if !self.is_live(generation) {
                        debug!("Ignoring frame from closed session");
                        continue;
                    }
                    if let Some(frame) = frames::decode(&text) {
                        self.listeners.dispatch(&frame);
                    }
                }
                Some(LinkEvent::Closed { code, reason }) => break (code, reason),
                None => break (None, "link dropped".to_string()),
            }
        };

        info!("Socket disconnected: code={:?} reason='{}'", code, reason);

        {
            let mut session = self.session();
            if session.generation != generation {
                return;
            }
            session.state = ReadyState::Closed;
            session.outbound = None;
        }
        self.schedule_reconnect(target, generation);
    }

    fn is_live(&self, generation: u64) -> bool {
        let session = self.session();
        session.generation == generation && session.state == ReadyState::Open
    }

    fn schedule_reconnect(self: &Arc<Self>, target: Target, generation: u64) {
        let max_attempts = self.config.reconnect.max_attempts;
        let interval = self.config.reconnect.interval;

        let attempt = {
            let mut session = self.session();
            if session.generation != generation || !session.should_reconnect {
                return;
            }
            if session.attempts >= max_attempts {
                warn!(
                    "Giving up on conversation {} after {} reconnect attempts",
                    target.conversation_id, max_attempts
                );
                return;
            }
            session.attempts += 1;
            session.attempts
        };

        info!("Attempting to reconnect... ({}/{})", attempt, max_attempts);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            {
                let session = inner.session();
                if session.generation != generation
                    || !session.should_reconnect
                    || session.state == ReadyState::Open
                {
                    debug!("Skipping stale reconnect attempt {}", attempt);
                    return;
                }
            }
            if let Err(e) = inner.begin_connect(target).await {
                warn!("Reconnect attempt {} failed: {}", attempt, e);
            }
        });
    }

    fn send(&self, frame: &OutboundFrame) {
        let session = self.session();
        let outbound = match (&session.state, &session.outbound) {
            (ReadyState::Open, Some(outbound)) => outbound,
            _ => {
                warn!("WebSocket is not connected; dropping {} frame", frame.name());
                return;
            }
        };
        match serde_json::to_string(frame) {
            Ok(text) => {
                if outbound.send(LinkCommand::Text(text)).is_err() {
                    warn!("Socket writer is gone; dropping {} frame", frame.name());
                }
            }
            Err(e) => error!("Failed to encode {} frame: {}", frame.name(), e),
        }
    }
}
