// Wire frames exchanged over the chat socket.
// Every frame is a JSON object discriminated by its "type" field.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{
    Attachment, Message, MessageId, MessageType, UserId, UserSummary, UserUpdate,
};

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Authenticate {
        token: String,
    },
    ChatMessage {
        message: String,
    },
    FileMessage {
        file_data: String,
        file_name: String,
        file_type: String,
    },
    TypingStart,
    TypingStop,
    MarkRead {
        message_id: MessageId,
    },
}

impl OutboundFrame {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundFrame::Authenticate { .. } => "authenticate",
            OutboundFrame::ChatMessage { .. } => "chat_message",
            OutboundFrame::FileMessage { .. } => "file_message",
            OutboundFrame::TypingStart => "typing_start",
            OutboundFrame::TypingStop => "typing_stop",
            OutboundFrame::MarkRead { .. } => "mark_read",
        }
    }
}

/// Payload of `chat_message` and `file_message` frames.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageEvent {
    pub message_id: MessageId,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub file_type: Option<String>,
}

impl MessageEvent {
    pub fn to_message(&self) -> Message {
        let content = self
            .message
            .clone()
            .or_else(|| self.content.clone())
            .unwrap_or_default();

        // At most one attachment, synthesized from the flat file fields
        let attachments = match &self.file_url {
            Some(url) => vec![Attachment {
                url: url.clone(),
                file_name: self.file_name.clone().unwrap_or_default(),
                file_size: self.file_size.unwrap_or(0),
                file_type: self.file_type.clone().unwrap_or_default(),
            }],
            None => Vec::new(),
        };

        Message {
            id: self.message_id,
            sender: UserSummary::new(self.sender_id, &self.sender),
            message_type: self.message_type,
            content,
            timestamp: self.timestamp,
            attachments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusEvent {
    pub user_id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    pub status: String,
}

impl StatusEvent {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemMessagePayload {
    pub id: MessageId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Payload of `user_update` and `user_profile_update` frames.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserUpdateEvent {
    pub user: UserUpdate,
    #[serde(default)]
    pub old_username: Option<String>,
    #[serde(default)]
    pub system_message: Option<SystemMessagePayload>,
}

impl UserUpdateEvent {
    pub fn system_message(&self) -> Option<Message> {
        self.system_message.as_ref().map(|payload| Message {
            id: payload.id,
            sender: UserSummary::new(
                self.user.id,
                self.user.username.as_deref().unwrap_or_default(),
            ),
            message_type: MessageType::System,
            content: payload.content.clone(),
            timestamp: payload.timestamp,
            attachments: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TypingEvent {
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub username: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// The discriminator of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    ChatMessage,
    FileMessage,
    UserStatus,
    UserUpdate,
    UserProfileUpdate,
    TypingIndicator,
    Error,
    /// A well-formed frame whose type this client does not model.
    Other(String),
}

impl EventKind {
    pub fn from_type(name: &str) -> Self {
        match name {
            "chat_message" => EventKind::ChatMessage,
            "file_message" => EventKind::FileMessage,
            "user_status" => EventKind::UserStatus,
            "user_update" => EventKind::UserUpdate,
            "user_profile_update" => EventKind::UserProfileUpdate,
            "typing_indicator" => EventKind::TypingIndicator,
            "error" => EventKind::Error,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::ChatMessage => "chat_message",
            EventKind::FileMessage => "file_message",
            EventKind::UserStatus => "user_status",
            EventKind::UserUpdate => "user_update",
            EventKind::UserProfileUpdate => "user_profile_update",
            EventKind::TypingIndicator => "typing_indicator",
            EventKind::Error => "error",
            EventKind::Other(name) => name,
        }
    }
}

/// A decoded inbound frame. Each recognized type carries its own payload shape.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    ChatMessage(MessageEvent),
    FileMessage(MessageEvent),
    UserStatus(StatusEvent),
    UserUpdate(UserUpdateEvent),
    UserProfileUpdate(UserUpdateEvent),
    TypingIndicator(TypingEvent),
    Error(ErrorEvent),
    Other { kind: String, body: Value },
}

impl InboundFrame {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundFrame::ChatMessage(_) => EventKind::ChatMessage,
            InboundFrame::FileMessage(_) => EventKind::FileMessage,
            InboundFrame::UserStatus(_) => EventKind::UserStatus,
            InboundFrame::UserUpdate(_) => EventKind::UserUpdate,
            InboundFrame::UserProfileUpdate(_) => EventKind::UserProfileUpdate,
            InboundFrame::TypingIndicator(_) => EventKind::TypingIndicator,
            InboundFrame::Error(_) => EventKind::Error,
            InboundFrame::Other { kind, .. } => EventKind::Other(kind.clone()),
        }
    }
}

/// Decode one text frame. Returns `None` (after logging) for anything that is not
/// a JSON object with a string `type`, or a recognized type with a malformed payload.
pub fn decode(text: &str) -> Option<InboundFrame> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("Dropping unparseable frame: {}", e);
            return None;
        }
    };

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => EventKind::from_type(kind),
        None => {
            warn!("Dropping frame without a type field");
            return None;
        }
    };

    let frame = match kind {
        EventKind::ChatMessage => payload(value).map(InboundFrame::ChatMessage),
        EventKind::FileMessage => payload(value).map(InboundFrame::FileMessage),
        EventKind::UserStatus => payload(value).map(InboundFrame::UserStatus),
        EventKind::UserUpdate => payload(value).map(InboundFrame::UserUpdate),
        EventKind::UserProfileUpdate => payload(value).map(InboundFrame::UserProfileUpdate),
        EventKind::TypingIndicator => payload(value).map(InboundFrame::TypingIndicator),
        EventKind::Error => payload(value).map(InboundFrame::Error),
        EventKind::Other(kind) => {
            debug!("Received frame of unmodelled type '{}'", kind);
            Ok(InboundFrame::Other { kind, body: value })
        }
    };

    match frame {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!("Dropping malformed frame: {}", e);
            None
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_chat_message() {
        let frame = decode(
            r#"{"type":"chat_message","message_id":42,"message":"hi","sender_id":7,
                "sender":"alice","message_type":"text","timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .expect("chat message decodes");

        let InboundFrame::ChatMessage(event) = frame else {
            panic!("expected chat_message, got {:?}", frame);
        };
        let message = event.to_message();
        assert_eq!(message.id, 42);
        assert_eq!(message.content, "hi");
        assert_eq!(message.sender.id, 7);
        assert_eq!(message.sender.username, "alice");
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn test_decode_file_message_synthesizes_attachment() {
        let frame = decode(
            r#"{"type":"file_message","message_id":5,"message":"Shared a file: a.pdf",
                "sender_id":2,"sender":"bob","message_type":"file",
                "timestamp":"2024-01-01T00:00:00+00:00","file_url":"/media/a.pdf",
                "file_name":"a.pdf","file_size":2048,"file_type":"application/pdf"}"#,
        )
        .expect("file message decodes");

        let InboundFrame::FileMessage(event) = frame else {
            panic!("expected file_message, got {:?}", frame);
        };
        let message = event.to_message();
        assert_eq!(message.message_type, MessageType::File);
        let attachment = message.attachment().expect("one attachment");
        assert_eq!(attachment.file_name, "a.pdf");
        assert_eq!(attachment.file_size, 2048);
    }

    #[test]
    fn test_decode_falls_back_to_content_field() {
        let frame = decode(
            r#"{"type":"chat_message","message_id":1,"content":"from content",
                "sender_id":1,"sender":"x","timestamp":"2024-01-01T00:00:00Z"}"#,
        );
        match frame {
            Some(InboundFrame::ChatMessage(event)) => {
                assert_eq!(event.to_message().content, "from content")
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not json").is_none());
        assert!(decode(r#"{"no_type": true}"#).is_none());
        assert!(decode(r#"{"type": 3}"#).is_none());
        // Known type, wrong payload shape
        assert!(decode(r#"{"type":"typing_indicator","is_typing":"yes"}"#).is_none());
    }

    #[test]
    fn test_decode_unknown_type_is_kept() {
        let frame = decode(r#"{"type":"chat_list_update","room":1}"#).expect("kept");
        assert_eq!(frame.kind(), EventKind::Other("chat_list_update".to_string()));
    }

    #[test]
    fn test_user_update_system_message() {
        let frame = decode(
            r#"{"type":"user_update","user":{"id":7,"username":"alice2","email":"a@x.io"},
                "old_username":"alice","message":"alice is now known as alice2",
                "system_message":{"id":90,"content":"alice is now known as alice2",
                "timestamp":"2024-01-01T00:00:00Z","message_type":"system"}}"#,
        )
        .expect("user update decodes");

        let InboundFrame::UserUpdate(event) = frame else {
            panic!("expected user_update");
        };
        let system = event.system_message().expect("system message present");
        assert_eq!(system.id, 90);
        assert_eq!(system.message_type, MessageType::System);
        assert_eq!(system.sender.username, "alice2");
    }

    #[test]
    fn test_outbound_shapes() {
        let typing = serde_json::to_value(OutboundFrame::TypingStart).expect("serializes");
        assert_eq!(typing, serde_json::json!({"type": "typing_start"}));

        let file = serde_json::to_value(OutboundFrame::FileMessage {
            file_data: "aGk=".to_string(),
            file_name: "hi.txt".to_string(),
            file_type: "text/plain".to_string(),
        })
        .expect("serializes");
        assert_eq!(
            file,
            serde_json::json!({
                "type": "file_message",
                "file_data": "aGk=",
                "file_name": "hi.txt",
                "file_type": "text/plain"
            })
        );

        let read = serde_json::to_value(OutboundFrame::MarkRead { message_id: 9 }).expect("serializes");
        assert_eq!(read, serde_json::json!({"type": "mark_read", "message_id": 9}));
    }
}
