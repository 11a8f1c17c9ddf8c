// Conversation store: the single owner of chat state.
// Actions call the resource client and the transport; inbound frames are
// reconciled by the handlers in `events`. Every mutation bumps a revision
// counter the UI watches.

use base64::{engine::general_purpose, Engine as _};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

mod events;
mod state;

pub use state::Snapshot;

use crate::api::ResourceClient;
use crate::error::TransportError;
use crate::models::{
    Conversation, ConversationId, MessageId, MessageType, NewMessage, OutgoingFile, UserId,
    UserUpdate,
};
use crate::transport::{Subscription, Transport};
use state::ChatState;

pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_ERROR_DISPLAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub typing_timeout: Duration,
    pub error_display: Duration,
    pub max_upload_bytes: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            error_display: DEFAULT_ERROR_DISPLAY,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Compact size for limit messages, e.g. `10MB`, `512KB` or `100 bytes`.
fn size_limit_label(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{}KB", bytes / KIB)
    } else {
        format!("{} bytes", bytes)
    }
}

/// State shared with frame handlers and timers. They hold it weakly.
pub(crate) struct Shared {
    state: Mutex<ChatState>,
    revision: watch::Sender<u64>,
    settings: StoreSettings,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ChatState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn read<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&self.lock())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let result = f(&mut self.lock());
        self.notify();
        result
    }

    /// Like `mutate`, but only notifies when `f` reports a change.
    fn mutate_if(&self, f: impl FnOnce(&mut ChatState) -> bool) -> bool {
        let changed = f(&mut self.lock());
        if changed {
            self.notify();
        }
        changed
    }

    /// Replace the current error. It clears itself unless a newer error replaced it.
    fn report_error(self: &Arc<Self>, message: String) {
        let seq = self.mutate(|state| {
            state.error_seq += 1;
            state.error = Some(message);
            state.error_seq
        });

        let weak = Arc::downgrade(self);
        let display = self.settings.error_display;
        tokio::spawn(async move {
            tokio::time::sleep(display).await;
            if let Some(shared) = weak.upgrade() {
                shared.mutate_if(|state| {
                    if state.error_seq == seq && state.error.is_some() {
                        state.error = None;
                        true
                    } else {
                        false
                    }
                });
            }
        });
    }
}

pub struct ConversationStore {
    shared: Arc<Shared>,
    resources: Arc<dyn ResourceClient>,
    transport: Transport,
    token: Option<String>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ConversationStore {
    pub fn new(
        resources: Arc<dyn ResourceClient>,
        transport: Transport,
        token: Option<String>,
        settings: StoreSettings,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        ConversationStore {
            shared: Arc::new(Shared {
                state: Mutex::new(ChatState::default()),
                revision,
                settings,
            }),
            resources,
            transport,
            token,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let connected = self.transport.is_connected();
        self.shared.read(|state| state.snapshot(connected))
    }

    /// Revision counter that ticks after every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    fn active_id(&self) -> Option<ConversationId> {
        self.shared.read(|state| state.active_id())
    }

    fn is_active(&self, conversation_id: ConversationId) -> bool {
        self.shared.read(|state| state.is_active(conversation_id))
    }

    fn fail(&self, message: &str, cause: &dyn std::fmt::Display) {
        error!("{}: {}", message, cause);
        self.shared.report_error(message.to_string());
    }

    pub async fn load_conversations(&self) {
        self.shared.mutate(|state| state.loading = true);
        let result = self.resources.list_conversations().await;
        match result {
            Ok(conversations) => {
                info!("Loaded {} conversations", conversations.len());
                self.shared.mutate(|state| {
                    state.conversations = conversations;
                    state.loading = false;
                });
            }
            Err(e) => {
                self.shared.mutate(|state| state.loading = false);
                self.fail("Failed to load conversations", &e);
            }
        }
    }

    /// Make `conversation` active and stand up its socket session.
    pub async fn select_conversation(&self, conversation: Conversation) {
        let conversation_id = conversation.id;
        info!("Selecting conversation {}", conversation_id);

        self.shared.mutate(|state| {
            state.active = Some(conversation);
            state.timeline.clear();
            state.typing.clear();
            // A pending older page belongs to the previous conversation
            state.loading_more = false;
        });

        self.teardown_session();
        self.subscribe_handlers();

        // The read receipt follows the first page and never waits on the socket
        let history = async {
            self.fetch_page(conversation_id, 1).await;
            if self.is_active(conversation_id) {
                self.spawn_read_receipt(conversation_id);
            }
        };
        let (connected, ()) = tokio::join!(
            self.transport.connect(conversation_id, self.token.as_deref()),
            history
        );

        if !self.is_active(conversation_id) {
            debug!("Conversation {} is no longer active", conversation_id);
            return;
        }
        match connected {
            Ok(()) => self.shared.notify(),
            Err(TransportError::Superseded) => {
                debug!("Connect for conversation {} was superseded", conversation_id)
            }
            Err(e) => self.fail("Failed to connect to real-time chat", &e),
        }
    }

    fn spawn_read_receipt(&self, conversation_id: ConversationId) {
        let resources = Arc::clone(&self.resources);
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            match resources.mark_read(conversation_id).await {
                Ok(()) => {
                    if let Some(shared) = weak.upgrade() {
                        shared.mutate(|state| state.clear_unread(conversation_id));
                    }
                }
                Err(e) => warn!(
                    "Failed to mark conversation {} read: {}",
                    conversation_id, e
                ),
            }
        });
    }

    /// Fetch a history page for the active conversation. Page 1 replaces the
    /// timeline; later pages are appended behind it.
    pub async fn load_more_messages(&self, page: u32) {
        let Some(conversation_id) = self.active_id() else {
            debug!("No active conversation to page");
            return;
        };
        self.fetch_page(conversation_id, page).await;
    }

    async fn fetch_page(&self, conversation_id: ConversationId, page: u32) {
        let first = page <= 1;
        self.shared.mutate(|state| {
            if first {
                state.loading = true;
            } else {
                state.loading_more = true;
            }
        });

        let result = self.resources.get_messages(conversation_id, page.max(1)).await;

        let applied = self.shared.mutate(|state| {
            if !state.is_active(conversation_id) {
                return false;
            }
            if first {
                state.loading = false;
            } else {
                state.loading_more = false;
            }
            if let Ok(messages) = &result {
                if first {
                    state.replace_first_page(messages.clone());
                } else {
                    let added = state.append_page(messages.clone());
                    debug!("Page {} added {} older messages", page, added);
                }
            }
            true
        });

        if !applied {
            debug!(
                "Dropping page {} for inactive conversation {}",
                page, conversation_id
            );
            return;
        }
        if let Err(e) = result {
            self.fail("Failed to load messages", &e);
        }
    }

    pub async fn send_message(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let Some(conversation_id) = self.active_id() else {
            return;
        };

        if self.transport.is_connected() {
            self.transport.send_message(text);
            return;
        }

        debug!("Socket closed, sending over HTTP");
        let message = NewMessage {
            content: text.to_string(),
            message_type: MessageType::Text,
        };
        match self.resources.send_message(conversation_id, &message).await {
            Ok(sent) => self.insert_for(conversation_id, sent),
            Err(e) => self.fail("Failed to send message", &e),
        }
    }

    /// Report the size error and return false when `size` is over the upload limit.
    pub fn check_upload_size(&self, size: u64) -> bool {
        let limit = self.shared.settings.max_upload_bytes;
        if size <= limit {
            return true;
        }
        warn!("Rejecting {} byte file, limit is {}", size, limit);
        self.shared.report_error(format!(
            "File size cannot exceed {}",
            size_limit_label(limit)
        ));
        false
    }

    pub async fn send_file(&self, file: OutgoingFile) {
        if !self.check_upload_size(file.size()) {
            return;
        }
        let Some(conversation_id) = self.active_id() else {
            return;
        };

        if self.transport.is_connected() {
            let encoded = general_purpose::STANDARD.encode(&file.data);
            self.transport
                .send_file(&encoded, &file.name, &file.mime_type);
            return;
        }

        debug!("Socket closed, uploading {} over HTTP", file.name);
        match self.resources.upload_file(conversation_id, &file).await {
            Ok(sent) => self.insert_for(conversation_id, sent),
            Err(e) => self.fail("Failed to send file", &e),
        }
    }

    fn insert_for(&self, conversation_id: ConversationId, message: crate::models::Message) {
        self.shared.mutate(|state| {
            if !state.is_active(conversation_id) {
                debug!("Dropping sent message {} for inactive conversation", message.id);
                return;
            }
            state.insert_message(message);
        });
    }

    pub async fn search_users(&self, query: &str) {
        if query.trim().is_empty() {
            self.shared.mutate(|state| state.search_results.clear());
            return;
        }

        self.shared.mutate(|state| state.search_loading = true);
        let result = self.resources.search_users(query).await;
        match result {
            Ok(users) => self.shared.mutate(|state| {
                state.search_results = users;
                state.search_loading = false;
            }),
            Err(e) => {
                self.shared.mutate(|state| state.search_loading = false);
                self.fail("Failed to search users", &e);
            }
        }
    }

    /// Request or reuse a private conversation with `user_id`. It is added to the
    /// front of the list unless already present.
    pub async fn create_private_chat(&self, user_id: UserId) -> Option<Conversation> {
        match self.resources.create_private_chat(user_id).await {
            Ok(conversation) => {
                let added = self
                    .shared
                    .mutate(|state| state.insert_conversation_front(conversation.clone()));
                debug!(
                    "Private chat {} with user {} (new: {})",
                    conversation.id, user_id, added
                );
                Some(conversation)
            }
            Err(e) => {
                self.fail("Failed to create chat", &e);
                None
            }
        }
    }

    pub fn start_typing(&self) {
        if self.transport.is_connected() {
            self.transport.send_typing_start();
        }
    }

    pub fn stop_typing(&self) {
        if self.transport.is_connected() {
            self.transport.send_typing_stop();
        }
    }

    pub fn mark_message_read(&self, message_id: MessageId) {
        if self.transport.is_connected() {
            self.transport.mark_read(message_id);
        }
    }

    /// Propagate a changed identity everywhere it is embedded, then reload the list.
    pub async fn refresh_user_data(&self, update: UserUpdate) {
        let changed = self.shared.mutate(|state| state.apply_user_update(&update));
        debug!("Applied identity update for user {} (changed: {})", update.id, changed);
        self.load_conversations().await;
    }

    pub fn clear_error(&self) {
        self.shared.mutate(|state| {
            state.error_seq += 1;
            state.error = None;
        });
    }

    /// Tear down the socket session. Further frames are ignored.
    pub fn close(&self) {
        self.teardown_session();
        self.shared.notify();
    }

    fn subscriptions(&self) -> MutexGuard<'_, Vec<Subscription>> {
        match self.subscriptions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn teardown_session(&self) {
        let subscriptions: Vec<Subscription> = self.subscriptions().drain(..).collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        self.transport.disconnect();
    }

    fn subscribe_handlers(&self) {
        let subscriptions: Vec<Subscription> = events::HANDLED_KINDS
            .iter()
            .cloned()
            .map(|kind| {
                let weak = Arc::downgrade(&self.shared);
                self.transport.add_event_listener(kind, move |frame| {
                    if let Some(shared) = weak.upgrade() {
                        events::reconcile(&shared, frame);
                    }
                })
            })
            .collect();
        self.subscriptions().extend(subscriptions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_limit_label() {
        assert_eq!(size_limit_label(DEFAULT_MAX_UPLOAD_BYTES), "10MB");
        assert_eq!(size_limit_label(512 * 1024), "512KB");
        assert_eq!(size_limit_label(1536 * 1024), "1536KB");
        assert_eq!(size_limit_label(100), "100 bytes");
    }
}
