//! Message types, delivery status, and the JSON envelope exchanged with clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Message type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Chat,
    Join,
    Leave,
    Typing,
    PresenceList,
    Receipt,
    HistoryRequest,
    HistoryResponse,
    Error,
    Ping,
    Pong,
}

// ---------------------------------------------------------------------------
// Delivery status
// ---------------------------------------------------------------------------

/// Delivery status of a chat message.
///
/// Moves forward only: `sent → delivered → read`. `error` is reachable from
/// `sent` alone and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Error,
}

impl MessageStatus {
    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Sent, Delivered) | (Sent, Read) | (Sent, Error) | (Delivered, Read)
        )
    }

    /// Statuses a client may report in a receipt. `error` is set by the
    /// server only.
    pub fn is_receipt_status(self) -> bool {
        matches!(self, MessageStatus::Delivered | MessageStatus::Read)
    }
}

// ---------------------------------------------------------------------------
// Presence entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OnlineUser {
    pub user_id: String,
    pub username: String,
    pub online: bool,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A message on the wire, in both directions.
///
/// Which optional fields are populated depends on `kind`: `status` on chat
/// and receipt messages, `limit` on history requests, `messages` on history
/// responses and `users` on presence lists. For receipts, `message_id` names
/// the chat message whose status is being reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HubMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub message_id: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<Object>>)]
    pub messages: Option<Vec<HubMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<OnlineUser>>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl HubMessage {
    /// An envelope of the given type with every optional field empty.
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            message_id: 0,
            user_id: String::new(),
            username: String::new(),
            content: String::new(),
            status: None,
            created_at: None,
            limit: None,
            messages: None,
            users: None,
        }
    }

    /// Decode a client frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn chat(user_id: &str, username: &str, content: impl Into<String>) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            content: content.into(),
            ..Self::new(MessageType::Chat)
        }
    }

    pub fn join(user_id: &str, username: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            content: format!("{username} joined"),
            created_at: Some(Utc::now()),
            ..Self::new(MessageType::Join)
        }
    }

    pub fn leave(user_id: &str, username: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            content: format!("{username} left"),
            created_at: Some(Utc::now()),
            ..Self::new(MessageType::Leave)
        }
    }

    pub fn presence_list(users: Vec<OnlineUser>) -> Self {
        Self {
            users: Some(users),
            created_at: Some(Utc::now()),
            ..Self::new(MessageType::PresenceList)
        }
    }

    /// A receipt from `user_id` reporting `status` for chat message `parent_id`.
    pub fn receipt(parent_id: i64, status: MessageStatus, user_id: &str, username: &str) -> Self {
        Self {
            message_id: parent_id,
            user_id: user_id.to_string(),
            username: username.to_string(),
            status: Some(status),
            created_at: Some(Utc::now()),
            ..Self::new(MessageType::Receipt)
        }
    }

    pub fn history_response(messages: Vec<HubMessage>) -> Self {
        Self {
            messages: Some(messages),
            created_at: Some(Utc::now()),
            ..Self::new(MessageType::HistoryResponse)
        }
    }

    pub fn pong() -> Self {
        Self {
            created_at: Some(Utc::now()),
            ..Self::new(MessageType::Pong)
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            created_at: Some(Utc::now()),
            ..Self::new(MessageType::Error)
        }
    }

    /// Stamp sender fields from the authenticated session, discarding
    /// whatever the client claimed.
    pub fn with_sender(mut self, user_id: &str, username: &str) -> Self {
        self.user_id = user_id.to_string();
        self.username = username.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        use MessageStatus::*;
        assert!(Sent.can_advance_to(Delivered));
        assert!(Sent.can_advance_to(Read));
        assert!(Delivered.can_advance_to(Read));
        assert!(Sent.can_advance_to(Error));

        assert!(!Read.can_advance_to(Delivered));
        assert!(!Delivered.can_advance_to(Delivered));
        assert!(!Delivered.can_advance_to(Error));
        assert!(!Error.can_advance_to(Read));
        assert!(!Read.can_advance_to(Sent));
    }

    #[test]
    fn clients_report_only_delivered_or_read() {
        use MessageStatus::*;
        assert!(Delivered.is_receipt_status());
        assert!(Read.is_receipt_status());
        assert!(!Error.is_receipt_status());
        assert!(!Sent.is_receipt_status());
    }

    #[test]
    fn decodes_minimal_chat_frame() {
        let msg = HubMessage::decode(r#"{"type":"chat","content":"hello"}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Chat);
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.message_id, 0);
        assert!(msg.status.is_none());
    }

    #[test]
    fn decodes_kebab_case_types() {
        let msg = HubMessage::decode(r#"{"type":"history-request","limit":20}"#).unwrap();
        assert_eq!(msg.kind, MessageType::HistoryRequest);
        assert_eq!(msg.limit, Some(20));

        let msg = HubMessage::decode(r#"{"type":"receipt","message_id":7,"status":"read"}"#)
            .unwrap();
        assert_eq!(msg.kind, MessageType::Receipt);
        assert_eq!(msg.message_id, 7);
        assert_eq!(msg.status, Some(MessageStatus::Read));
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(HubMessage::decode(r#"{"type":"shout","content":"x"}"#).is_err());
        assert!(HubMessage::decode("not json").is_err());
    }

    #[test]
    fn serializes_presence_list_without_empty_fields() {
        let msg = HubMessage::presence_list(vec![OnlineUser {
            user_id: "1".into(),
            username: "alice".into(),
            online: true,
        }]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "presence-list");
        assert_eq!(value["users"][0]["user_id"], "1");
        assert!(value.get("message_id").is_none());
        assert!(value.get("content").is_none());
        assert!(value.get("messages").is_none());
    }

    #[test]
    fn with_sender_overrides_claimed_identity() {
        let msg = HubMessage::decode(r#"{"type":"chat","user_id":"999","content":"x"}"#)
            .unwrap()
            .with_sender("1", "alice");
        assert_eq!(msg.user_id, "1");
        assert_eq!(msg.username, "alice");
    }
}
