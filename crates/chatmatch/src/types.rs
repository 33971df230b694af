use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

const MAX_CONVERSATION_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    System,
    User,
    Assistant,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::System => "system",
            MessageType::User => "user",
            MessageType::Assistant => "assistant",
        }
    }
}

/// One stored conversation turn.
///
/// Turns of a conversation form a singly-linked list through
/// `previous_message_id`; the store keeps them ordered by creation so the list
/// can be walked as a slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub text: String,
    pub previous_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build an unlinked message. Used for synthetic conversations that are
    /// compiled but never stored.
    pub fn transient(message_type: MessageType, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id: String::new(),
            message_type,
            text: text.into(),
            previous_message_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.message_type == MessageType::User
    }
}

/// Payload for `ConversationStore::append`. Ids, links and timestamps are
/// assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub text: String,
}

impl NewMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { message_type: MessageType::User, text: text.into() }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self { message_type: MessageType::Assistant, text: text.into() }
    }
    pub fn system(text: impl Into<String>) -> Self {
        Self { message_type: MessageType::System, text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub project_id: Option<String>,
    pub assistant_id: Option<String>,
    pub name: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub id: u64,
    pub bot_id: String,
    pub project_id: Option<String>,
    pub canonical_text: String,
}

/// A stored phrasing of an intent; `normalized_key` is the lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentExample {
    pub id: u64,
    pub intent_id: u64,
    pub raw_text: String,
    pub normalized_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: u64,
    pub intent_id: u64,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// An option offered to the candidate-narrowing classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: u64,
    pub text: String,
}

impl Candidate {
    pub fn new(id: u64, text: impl Into<String>) -> Self {
        Self { id, text: text.into() }
    }
}

impl From<&Intent> for Candidate {
    fn from(intent: &Intent) -> Self {
        Self { id: intent.id, text: intent.canonical_text.clone() }
    }
}

/// Reject conversation ids that could not have come from a well-behaved client.
pub fn validate_conversation_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(EngineError::validation("conversation id is empty"));
    }
    if id.len() > MAX_CONVERSATION_ID_LEN {
        return Err(EngineError::validation(format!(
            "conversation id exceeds {} bytes",
            MAX_CONVERSATION_ID_LEN
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':' || c == '.')
    {
        return Err(EngineError::validation(format!(
            "conversation id '{}' contains invalid characters",
            id
        )));
    }
    Ok(())
}
