use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::ConversationStore;
use crate::error::{EngineError, Result};
use crate::types::{validate_conversation_id, Conversation, Message, MessageType, NewMessage};

const CONVERSATION_NAME_CHARS: usize = 48;

/// Process-local conversation store.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn empty_conversation(
    conversation_id: &str,
    project_id: Option<&str>,
    assistant_id: Option<&str>,
) -> Conversation {
    Conversation {
        id: conversation_id.to_string(),
        project_id: project_id.map(str::to_string),
        assistant_id: assistant_id.map(str::to_string),
        name: String::new(),
        messages: Vec::new(),
    }
}

fn conversation_name(messages: &[NewMessage]) -> String {
    messages
        .iter()
        .find(|m| m.message_type == MessageType::User)
        .map(|m| m.text.trim().chars().take(CONVERSATION_NAME_CHARS).collect())
        .unwrap_or_else(|| "New conversation".to_string())
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn open(
        &self,
        conversation_id: &str,
        project_id: Option<&str>,
        assistant_id: Option<&str>,
    ) -> Result<Conversation> {
        validate_conversation_id(conversation_id)?;
        let mut conversations = self.conversations.write();
        let conversation = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| empty_conversation(conversation_id, project_id, assistant_id));
        Ok(conversation.clone())
    }

    async fn append(
        &self,
        conversation_id: &str,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<Message>> {
        validate_conversation_id(conversation_id)?;
        if messages.is_empty() {
            return Err(EngineError::validation("nothing to append"));
        }
        if let Some(blank) = messages.iter().position(|m| m.text.trim().is_empty()) {
            return Err(EngineError::validation(format!("message #{} is empty", blank + 1)));
        }

        let mut conversations = self.conversations.write();
        let conversation = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| empty_conversation(conversation_id, None, None));
        if conversation.name.is_empty() {
            conversation.name = conversation_name(&messages);
        }

        let mut previous = conversation.messages.last().map(|m| m.id);
        let mut stored = Vec::with_capacity(messages.len());
        for new in messages {
            let message = Message {
                id: Uuid::new_v4(),
                conversation_id: conversation_id.to_string(),
                message_type: new.message_type,
                text: new.text,
                previous_message_id: previous,
                created_at: Utc::now(),
            };
            previous = Some(message.id);
            stored.push(message);
        }
        conversation.messages.extend(stored.iter().cloned());

        tracing::debug!(
            conversation_id = %conversation_id,
            appended = stored.len(),
            total = conversation.messages.len(),
            "Appended messages"
        );
        Ok(stored)
    }

    async fn read(&self, conversation_id: &str) -> Result<Vec<Message>> {
        validate_conversation_id(conversation_id)?;
        Ok(self
            .conversations
            .read()
            .get(conversation_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default())
    }

    async fn conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        validate_conversation_id(conversation_id)?;
        Ok(self.conversations.read().get(conversation_id).cloned())
    }

    async fn clear(&self, conversation_id: &str) -> Result<()> {
        validate_conversation_id(conversation_id)?;
        if let Some(conversation) = self.conversations.write().get_mut(conversation_id) {
            conversation.messages.clear();
        }
        Ok(())
    }
}
