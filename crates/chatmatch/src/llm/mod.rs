//! Completion provider contract plus the HTTP client and rate scheduler
//! that sit in front of a real model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::MessageType;

pub mod external;
pub mod scheduler;

pub use external::ExternalProvider;
pub use scheduler::RequestScheduler;

/// A role-tagged turn for chat-style providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: MessageType,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionInput {
    /// A compiled prompt sent as one user turn.
    Prompt(String),
    Messages(Vec<ChatTurn>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub input: CompletionInput,
    pub max_tokens: usize,
    pub temperature: f32,
    pub stop: Vec<String>,
}

impl CompletionRequest {
    pub fn prompt(prompt: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            input: CompletionInput::Prompt(prompt.into()),
            max_tokens,
            temperature: 0.0,
            stop: Vec::new(),
        }
    }

    pub fn messages(turns: Vec<ChatTurn>, max_tokens: usize) -> Self {
        Self {
            input: CompletionInput::Messages(turns),
            max_tokens,
            temperature: 0.0,
            stop: Vec::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }

    /// Characters of input, for logging.
    pub fn input_len(&self) -> usize {
        match &self.input {
            CompletionInput::Prompt(prompt) => prompt.len(),
            CompletionInput::Messages(turns) => turns.iter().map(|t| t.content.len()).sum(),
        }
    }
}

/// Anything that can turn a prompt into text.
///
/// Failures use the engine taxonomy: `RateLimited`, `Timeout` and `Provider`
/// are transient, `ProviderFatal` is not.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    fn name(&self) -> &str {
        "completion-provider"
    }
}
