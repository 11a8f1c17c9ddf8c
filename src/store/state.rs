// In-memory chat state owned by the store, and the read-only snapshot handed to the UI.

use std::collections::{HashMap, HashSet};
use tokio::time::Instant;

use crate::models::{Conversation, ConversationId, Message, MessageId, UserId, UserSummary, UserUpdate};

#[derive(Debug, Default)]
pub(crate) struct ChatState {
    pub conversations: Vec<Conversation>,
    pub active: Option<Conversation>,
    /// Newest first.
    pub timeline: Vec<Message>,
    pub online: HashSet<UserId>,
    /// Username to expiry deadline.
    pub typing: HashMap<String, Instant>,
    pub loading: bool,
    pub loading_more: bool,
    pub error: Option<String>,
    pub error_seq: u64,
    pub search_results: Vec<UserSummary>,
    pub search_loading: bool,
}

impl ChatState {
    pub fn active_id(&self) -> Option<ConversationId> {
        self.active.as_ref().map(|c| c.id)
    }

    pub fn is_active(&self, conversation_id: ConversationId) -> bool {
        self.active_id() == Some(conversation_id)
    }

    fn contains_message(&self, id: MessageId) -> bool {
        self.timeline.iter().any(|m| m.id == id)
    }

    /// Insert a message as the newest entry. Returns false if its id is already present.
    pub fn insert_message(&mut self, message: Message) -> bool {
        if self.contains_message(message.id) {
            return false;
        }
        self.timeline.insert(0, message);
        true
    }

    /// Replace the timeline with the first history page. Messages that arrived over the
    /// socket while the page was in flight stay in front of it.
    pub fn replace_first_page(&mut self, page: Vec<Message>) {
        let page_ids: HashSet<MessageId> = page.iter().map(|m| m.id).collect();
        let mut timeline: Vec<Message> = self
            .timeline
            .drain(..)
            .filter(|m| !page_ids.contains(&m.id))
            .collect();

        let mut seen: HashSet<MessageId> = timeline.iter().map(|m| m.id).collect();
        timeline.extend(page.into_iter().filter(|m| seen.insert(m.id)));
        self.timeline = timeline;
    }

    /// Append an older page behind the current timeline. Returns the number added.
    pub fn append_page(&mut self, page: Vec<Message>) -> usize {
        let mut seen: HashSet<MessageId> = self.timeline.iter().map(|m| m.id).collect();
        let before = self.timeline.len();
        self.timeline
            .extend(page.into_iter().filter(|m| seen.insert(m.id)));
        self.timeline.len() - before
    }

    pub fn record_last_message(&mut self, conversation_id: ConversationId, message: &Message) {
        let targets = self
            .conversations
            .iter_mut()
            .chain(self.active.as_mut())
            .filter(|c| c.id == conversation_id);
        for conversation in targets {
            conversation.last_message = Some(message.clone());
            conversation.updated_at = Some(message.timestamp);
        }
    }

    /// Rewrite every embedded copy of a user's identity. Unread counts and ordering are untouched.
    pub fn apply_user_update(&mut self, update: &UserUpdate) -> bool {
        let mut changed = false;
        for message in &mut self.timeline {
            changed |= message.sender.apply(update);
        }
        for conversation in &mut self.conversations {
            changed |= conversation.apply_user_update(update);
        }
        if let Some(active) = &mut self.active {
            changed |= active.apply_user_update(update);
        }
        changed
    }

    pub fn insert_conversation_front(&mut self, conversation: Conversation) -> bool {
        if self.conversations.iter().any(|c| c.id == conversation.id) {
            return false;
        }
        self.conversations.insert(0, conversation);
        true
    }

    pub fn clear_unread(&mut self, conversation_id: ConversationId) {
        for conversation in self
            .conversations
            .iter_mut()
            .chain(self.active.as_mut())
            .filter(|c| c.id == conversation_id)
        {
            conversation.unread_count = 0;
        }
    }

    /// Drop a typing entry only if it still carries `deadline`; a restart replaces it.
    pub fn expire_typing(&mut self, username: &str, deadline: Instant) -> bool {
        if self.typing.get(username) == Some(&deadline) {
            self.typing.remove(username);
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self, connected: bool) -> Snapshot {
        let mut typing_users: Vec<String> = self.typing.keys().cloned().collect();
        typing_users.sort();

        Snapshot {
            conversations: self.conversations.clone(),
            active: self.active.clone(),
            messages: self.timeline.clone(),
            online_users: self.online.clone(),
            typing_users,
            loading: self.loading,
            loading_more: self.loading_more,
            error: self.error.clone(),
            search_results: self.search_results.clone(),
            search_loading: self.search_loading,
            connected,
        }
    }
}

/// Read-only copy of the store's state at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub conversations: Vec<Conversation>,
    pub active: Option<Conversation>,
    /// Newest first, as stored. Use [`Snapshot::timeline`] for display order.
    pub messages: Vec<Message>,
    pub online_users: HashSet<UserId>,
    pub typing_users: Vec<String>,
    pub loading: bool,
    pub loading_more: bool,
    pub error: Option<String>,
    pub search_results: Vec<UserSummary>,
    pub search_loading: bool,
    pub connected: bool,
}

impl Snapshot {
    /// Messages oldest first.
    pub fn timeline(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().rev()
    }

    pub fn newest(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.online_users.contains(&user_id)
    }

    pub fn conversation(&self, conversation_id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }
}
