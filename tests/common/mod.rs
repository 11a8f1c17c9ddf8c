// Common test utilities for integration tests
// Scripted in-memory socket connector, recording resource client and fixtures.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::LevelFilter;
use serde_json::Value;
use tokio::sync::mpsc;

use chatwire::api::ResourceClient;
use chatwire::error::{ApiError, TransportError};
use chatwire::models::{
    Conversation, ConversationId, ConversationType, Message, MessageType, NewMessage,
    OutgoingFile, UserId, UserSummary,
};
use chatwire::store::{ConversationStore, StoreSettings};
use chatwire::transport::{Connector, Link, LinkCommand, LinkEvent, Transport, TransportConfig};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub const WS_BASE: &str = "ws://chat.test";
pub const TOKEN: &str = "secret token";

/// Let every ready task run, then advance the paused clock slightly.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Server side of one socket opened through [`FakeConnector`].
struct ServerSide {
    url: String,
    to_client: mpsc::UnboundedSender<LinkEvent>,
    from_client: mpsc::UnboundedReceiver<LinkCommand>,
    received: Vec<Value>,
    closed_by_client: bool,
}

impl ServerSide {
    fn drain(&mut self) {
        while let Ok(command) = self.from_client.try_recv() {
            match command {
                LinkCommand::Text(text) => match serde_json::from_str(&text) {
                    Ok(value) => self.received.push(value),
                    Err(e) => panic!("client sent invalid JSON {:?}: {}", text, e),
                },
                LinkCommand::Close => self.closed_by_client = true,
            }
        }
    }
}

/// In-memory connector. Every successful open is recorded as a numbered session.
#[derive(Default)]
pub struct FakeConnector {
    opens: AtomicUsize,
    refuse: AtomicBool,
    delay: Mutex<Option<Duration>>,
    sessions: Mutex<Vec<ServerSide>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeConnector::default())
    }

    /// Make subsequent opens fail (or succeed again).
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Delay every open by `delay` of tokio time.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Open attempts, successful or not.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn url(&self, session: usize) -> String {
        self.sessions.lock().unwrap()[session].url.clone()
    }

    pub fn push(&self, session: usize, frame: Value) {
        self.push_raw(session, &frame.to_string());
    }

    pub fn push_raw(&self, session: usize, text: &str) {
        let sessions = self.sessions.lock().unwrap();
        let _ = sessions[session].to_client.send(LinkEvent::Text(text.to_string()));
    }

    /// Push a frame to the most recent session.
    pub fn push_latest(&self, frame: Value) {
        let latest = self.session_count() - 1;
        self.push(latest, frame);
    }

    /// Simulate the server dropping the socket.
    pub fn drop_connection(&self, session: usize) {
        let sessions = self.sessions.lock().unwrap();
        let _ = sessions[session].to_client.send(LinkEvent::Closed {
            code: Some(1006),
            reason: "abnormal closure".to_string(),
        });
    }

    /// Frames the client has sent on `session`, in order.
    pub fn sent(&self, session: usize) -> Vec<Value> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions[session].drain();
        sessions[session].received.clone()
    }

    pub fn sent_types(&self, session: usize) -> Vec<String> {
        self.sent(session)
            .iter()
            .map(|frame| frame["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn closed_by_client(&self, session: usize) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        sessions[session].drain();
        sessions[session].closed_by_client
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, url: &str) -> Result<Link, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.sessions.lock().unwrap().push(ServerSide {
            url: url.to_string(),
            to_client: inbound_tx,
            from_client: outbound_rx,
            received: Vec::new(),
            closed_by_client: false,
        });
        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

pub fn transport_config() -> TransportConfig {
    TransportConfig {
        ws_base_url: WS_BASE.to_string(),
        ..TransportConfig::default()
    }
}

pub fn transport(connector: &Arc<FakeConnector>) -> Transport {
    setup_logging();
    Transport::new(transport_config(), connector.clone())
}

/// Resource client that serves canned data and records every call.
pub struct MockResourceClient {
    pub conversations: Mutex<Vec<Conversation>>,
    pub pages: Mutex<HashMap<(ConversationId, u32), Vec<Message>>>,
    pub private_chats: Mutex<HashMap<UserId, Conversation>>,
    pub users: Mutex<Vec<UserSummary>>,
    failing: Mutex<HashSet<&'static str>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicI64,
}

impl MockResourceClient {
    pub fn new() -> Arc<Self> {
        Arc::new(MockResourceClient {
            conversations: Mutex::new(Vec::new()),
            pages: Mutex::new(HashMap::new()),
            private_chats: Mutex::new(HashMap::new()),
            users: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1000),
        })
    }

    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        *self.conversations.lock().unwrap() = conversations;
    }

    pub fn set_page(&self, conversation_id: ConversationId, page: u32, messages: Vec<Message>) {
        self.pages.lock().unwrap().insert((conversation_id, page), messages);
    }

    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.failing.lock().unwrap().remove(operation);
    }

    pub fn delay(&self, operation: &'static str, delay: Option<Duration>) {
        let mut delays = self.delays.lock().unwrap();
        match delay {
            Some(delay) => delays.insert(operation, delay),
            None => delays.remove(operation),
        };
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose record starts with `operation`.
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(':').next() == Some(operation))
            .count()
    }

    async fn enter(&self, operation: &'static str, record: String) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(record);
        let delay = self.delays.lock().unwrap().get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(operation) {
            return Err(ApiError::Status {
                status: 500,
                body: format!("{} failed", operation),
            });
        }
        Ok(())
    }

    fn next_message(&self, content: &str, message_type: MessageType) -> Message {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Message {
            id,
            sender: user(1, "me"),
            message_type,
            content: content.to_string(),
            timestamp: at(100),
            attachments: Vec::new(),
        }
    }
}

#[async_trait]
impl ResourceClient for MockResourceClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.enter("list_conversations", "list_conversations".to_string())
            .await?;
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn get_messages(
        &self,
        conversation_id: ConversationId,
        page: u32,
    ) -> Result<Vec<Message>, ApiError> {
        self.enter("get_messages", format!("get_messages:{}:{}", conversation_id, page))
            .await?;
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(&(conversation_id, page))
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        message: &NewMessage,
    ) -> Result<Message, ApiError> {
        self.enter(
            "send_message",
            format!("send_message:{}:{}", conversation_id, message.content),
        )
        .await?;
        Ok(self.next_message(&message.content, message.message_type))
    }

    async fn upload_file(
        &self,
        conversation_id: ConversationId,
        file: &OutgoingFile,
    ) -> Result<Message, ApiError> {
        self.enter(
            "upload_file",
            format!("upload_file:{}:{}", conversation_id, file.name),
        )
        .await?;
        Ok(self.next_message(&format!("Shared a file: {}", file.name), MessageType::File))
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), ApiError> {
        self.enter("mark_read", format!("mark_read:{}", conversation_id))
            .await
    }

    async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>, ApiError> {
        self.enter("search_users", format!("search_users:{}", query))
            .await?;
        Ok(self.users.lock().unwrap().clone())
    }

    async fn create_private_chat(&self, user_id: UserId) -> Result<Conversation, ApiError> {
        self.enter("create_private_chat", format!("create_private_chat:{}", user_id))
            .await?;
        let mut chats = self.private_chats.lock().unwrap();
        let next = 500 + chats.len() as ConversationId;
        Ok(chats
            .entry(user_id)
            .or_insert_with(|| {
                let mut room = conversation(next, &[user(user_id, "peer")]);
                room.other_participant = Some(user(user_id, "peer"));
                room
            })
            .clone())
    }
}

pub fn store(connector: &Arc<FakeConnector>, api: &Arc<MockResourceClient>) -> Arc<ConversationStore> {
    Arc::new(ConversationStore::new(
        api.clone(),
        transport(connector),
        Some(TOKEN.to_string()),
        StoreSettings::default(),
    ))
}

pub fn at(seconds: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, seconds / 60, seconds % 60)
        .unwrap()
}

pub fn user(id: UserId, username: &str) -> UserSummary {
    UserSummary::new(id, username)
}

pub fn conversation(id: ConversationId, participants: &[UserSummary]) -> Conversation {
    Conversation {
        id,
        name: Some(format!("room {}", id)),
        kind: if participants.len() > 1 {
            ConversationType::Group
        } else {
            ConversationType::Private
        },
        participants: participants.to_vec(),
        other_participant: None,
        last_message: None,
        unread_count: 0,
        updated_at: None,
    }
}

pub fn message(id: i64, sender: &UserSummary, content: &str) -> Message {
    Message {
        id,
        sender: sender.clone(),
        message_type: MessageType::Text,
        content: content.to_string(),
        timestamp: at(id as u32 % 3600),
        attachments: Vec::new(),
    }
}

pub fn chat_frame(id: i64, sender_id: UserId, sender: &str, text: &str) -> Value {
    serde_json::json!({
        "type": "chat_message",
        "message_id": id,
        "message": text,
        "sender_id": sender_id,
        "sender": sender,
        "message_type": "text",
        "timestamp": "2024-01-01T00:00:00Z"
    })
}

pub fn typing_frame(username: &str, is_typing: bool) -> Value {
    serde_json::json!({
        "type": "typing_indicator",
        "user_id": 2,
        "username": username,
        "is_typing": is_typing
    })
}

pub fn error_frame(message: &str) -> Value {
    serde_json::json!({ "type": "error", "message": message })
}
