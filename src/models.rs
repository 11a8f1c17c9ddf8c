// Domain models shared by the transport, the resource client and the store.
// Field names follow the server's JSON so the same types serve as wire shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ConversationId = i64;
pub type MessageId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    Private,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    File,
    Image,
    System,
}

/// Display identity of a user as embedded in messages and participant lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

impl UserSummary {
    pub fn new(id: UserId, username: &str) -> Self {
        UserSummary {
            id,
            username: username.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            profile_image: None,
        }
    }

    /// "First Last" when known, otherwise the username.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }

    /// Overwrite the fields carried by `update`. Returns true if anything changed.
    pub fn apply(&mut self, update: &UserUpdate) -> bool {
        if self.id != update.id {
            return false;
        }
        let before = self.clone();
        if let Some(username) = &update.username {
            self.username = username.clone();
        }
        if let Some(first_name) = &update.first_name {
            self.first_name = first_name.clone();
        }
        if let Some(last_name) = &update.last_name {
            self.last_name = last_name.clone();
        }
        if let Some(profile_image) = &update.profile_image {
            self.profile_image = Some(profile_image.clone());
        }
        *self != before
    }
}

/// A changed display identity, pushed by the server or supplied by the profile screen.
/// Absent fields are left untouched when applied.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Download URL of the stored file.
    #[serde(rename = "file")]
    pub url: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: UserSummary,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachments.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "room_type")]
    pub kind: ConversationType,
    #[serde(default)]
    pub participants: Vec<UserSummary>,
    #[serde(default)]
    pub other_participant: Option<UserSummary>,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        match &self.other_participant {
            Some(other) => other.display_name(),
            None => format!("Conversation {}", self.id),
        }
    }

    /// Re-label every embedded copy of the user's identity.
    pub fn apply_user_update(&mut self, update: &UserUpdate) -> bool {
        let mut changed = false;
        for participant in &mut self.participants {
            changed |= participant.apply(update);
        }
        if let Some(other) = &mut self.other_participant {
            changed |= other.apply(update);
        }
        if let Some(last) = &mut self.last_message {
            changed |= last.sender.apply(update);
        }
        changed
    }
}

/// Body of an HTTP message send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub content: String,
    pub message_type: MessageType,
}

/// A file picked for sending, held in memory until it is inlined or uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl OutgoingFile {
    pub fn new(name: &str, mime_type: &str, data: Vec<u8>) -> Self {
        OutgoingFile {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            data,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserSummary {
        UserSummary {
            id: 7,
            username: "alice".to_string(),
            first_name: "Alice".to_string(),
            last_name: "Liddell".to_string(),
            profile_image: None,
        }
    }

    #[test]
    fn test_apply_only_overwrites_present_fields() {
        let mut user = alice();
        let update = UserUpdate {
            id: 7,
            username: Some("alice2".to_string()),
            ..Default::default()
        };

        assert!(user.apply(&update));
        assert_eq!(user.username, "alice2");
        assert_eq!(user.first_name, "Alice");

        // Applying the same update again is a no-op
        assert!(!user.apply(&update));
    }

    #[test]
    fn test_apply_ignores_other_users() {
        let mut user = alice();
        let update = UserUpdate {
            id: 8,
            username: Some("mallory".to_string()),
            ..Default::default()
        };
        assert!(!user.apply(&update));
        assert_eq!(user.username, "alice");
    }

    #[test]
    fn test_conversation_from_server_json() {
        let raw = r#"{
            "id": 3,
            "name": null,
            "room_type": "private",
            "participants": [{"id": 7, "username": "alice", "first_name": "", "last_name": "", "email": "a@x.io", "status": "online"}],
            "created_by": 7,
            "other_participant": {"id": 7, "username": "alice"},
            "last_message": null,
            "unread_count": 4,
            "updated_at": "2024-01-01T10:00:00.123456+00:00"
        }"#;
        let conversation: Conversation = serde_json::from_str(raw).expect("valid room json");

        assert_eq!(conversation.kind, ConversationType::Private);
        assert_eq!(conversation.unread_count, 4);
        assert_eq!(conversation.display_name(), "alice");
    }

    #[test]
    fn test_message_from_server_json() {
        let raw = r#"{
            "id": 42,
            "room": 3,
            "sender": {"id": 7, "username": "alice"},
            "message_type": "file",
            "content": "Shared a file: a.png",
            "timestamp": "2024-01-01T00:00:00Z",
            "is_edited": false,
            "attachments": [{"id": 1, "file": "/media/a.png", "file_name": "a.png", "file_size": 12, "file_type": "image/png"}]
        }"#;
        let message: Message = serde_json::from_str(raw).expect("valid message json");

        assert_eq!(message.message_type, MessageType::File);
        assert_eq!(message.attachment().map(|a| a.url.as_str()), Some("/media/a.png"));
    }
}
