//! Conversation history persistence.
//!
//! Stores keep each conversation as an append-only, creation-ordered list of
//! messages linked through `previous_message_id`. Appends are all-or-nothing.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Conversation, Message, NewMessage};

pub use memory::InMemoryConversationStore;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create the conversation record if missing, attaching project and
    /// assistant ids. Existing conversations are returned unchanged.
    async fn open(
        &self,
        conversation_id: &str,
        project_id: Option<&str>,
        assistant_id: Option<&str>,
    ) -> Result<Conversation>;

    /// Append turns in order, linking each to its predecessor. Either every
    /// message is stored or none is.
    async fn append(
        &self,
        conversation_id: &str,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<Message>>;

    /// All turns, oldest first. Unknown conversations read as empty.
    async fn read(&self, conversation_id: &str) -> Result<Vec<Message>>;

    async fn conversation(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// Delete every message of the conversation.
    async fn clear(&self, conversation_id: &str) -> Result<()>;
}
