pub mod engine;

use serde::{Deserialize, Serialize};

use crate::intent::IntentMatch;
use crate::types::{Message, Response};

pub use engine::ChatEngine;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub conversation_id: String,
    pub bot_id: String,
    pub text: String,
}

/// How a reply was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    /// Stored response of an intent whose phrasing matched.
    Faq,
    /// Stored response of an intent picked by the classifier.
    Classified,
    /// Completion over the compiled conversation.
    Generated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub text: String,
    pub source: ReplySource,
    pub intent_id: Option<u64>,
    /// The user turn and the reply as persisted.
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Replied(ChatReply),
    /// A newer request for the same conversation took over; nothing was stored.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingRequest {
    pub bot_id: String,
    pub project_id: Option<String>,
    /// Phrasings of the intent; the first one names a newly created intent.
    pub texts: Vec<String>,
    pub response: Option<String>,
    /// Fold every other intent the texts resolved to into the target.
    #[serde(default)]
    pub merge: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingResult {
    pub intent_match: IntentMatch,
    pub response: Option<Response>,
    pub deleted_intent_ids: Vec<u64>,
}
