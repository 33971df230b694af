//! Budget-bounded prompt construction from conversation history.

pub mod compiler;

use serde::{Deserialize, Serialize};

use crate::types::Message;

pub use compiler::compile;

/// Where the instruction text goes relative to the packed history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefixPlacement {
    #[default]
    Prefix,
    /// Used by classifier prompts, where the question must follow the options.
    Postfix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLabels {
    pub user: String,
    pub assistant: String,
}

/// Constraints for one compilation. Built per call, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptBudget {
    /// Hard character limit for history; advisory for the prefix.
    pub max_length: usize,
    pub stop_marker: String,
    pub labels: RoleLabels,
    #[serde(default)]
    pub placement: PrefixPlacement,
}

impl PromptBudget {
    /// Separator emitted before every rendered turn.
    pub fn turn_separator(&self) -> String {
        format!("{}\n\n", self.stop_marker)
    }

    /// Trailer that asks the model to speak as the assistant.
    pub fn assistant_cue(&self) -> String {
        format!("{}{}:\n", self.turn_separator(), self.labels.assistant)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPrompt {
    pub prompt: String,
    /// Chronological sub-list of the input that made it into `prompt`.
    pub included_messages: Vec<Message>,
    pub included_assistant_turn_count: usize,
}
