//! Greedy, most-recent-first history packing.
//!
//! Turns are rendered as `marker\n\nLabel:\ntext` and prepended newest first
//! until the next one would break the budget. An assistant or system turn is
//! only admitted when the turn before it fits as well, so a reply never opens
//! the prompt without the question that triggered it.

use super::{CompiledPrompt, PrefixPlacement, PromptBudget};
use crate::types::{Message, MessageType};

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn render(message: &Message, budget: &PromptBudget) -> String {
    let label = match message.message_type {
        MessageType::User => Some(budget.labels.user.as_str()),
        MessageType::Assistant => Some(budget.labels.assistant.as_str()),
        MessageType::System => None,
    };
    match label {
        Some(label) => format!("{}\n\n{}:\n{}", budget.stop_marker, label, message.text),
        None => format!("{}\n\n{}", budget.stop_marker, message.text),
    }
}

/// Pack as much recent history as fits into `budget` and attach `prefix`.
///
/// Pure: the same inputs always produce the same prompt.
pub fn compile(messages: &[Message], prefix: &str, budget: &PromptBudget) -> CompiledPrompt {
    let prefix_len = char_len(prefix);
    let newest_first: Vec<(&Message, String)> = messages
        .iter()
        .rev()
        .map(|m| (m, render(m, budget)))
        .collect();

    let mut blocks: Vec<&str> = Vec::new();
    let mut included: Vec<Message> = Vec::new();
    let mut used = 0usize;
    let mut assistant_turns = 0usize;

    for (index, (message, rendered)) in newest_first.iter().enumerate() {
        let len = char_len(rendered);
        if len + used + prefix_len >= budget.max_length {
            break;
        }

        if message.message_type != MessageType::User {
            if let Some((_, older)) = newest_first.get(index + 1) {
                if char_len(older) + len + used + prefix_len >= budget.max_length {
                    break;
                }
            }
        }

        used += len;
        if message.message_type == MessageType::Assistant {
            assistant_turns += 1;
        }
        blocks.push(rendered);
        included.push((*message).clone());
    }

    blocks.reverse();
    included.reverse();

    let history = blocks.concat();
    let separator = budget.turn_separator();
    let history = match history.find(&separator) {
        Some(pos) => &history[pos + separator.len()..],
        None => history.as_str(),
    };

    let prompt = if history.is_empty() {
        prefix.to_string()
    } else if prefix.is_empty() {
        history.to_string()
    } else {
        match budget.placement {
            PrefixPlacement::Prefix => format!("{}\n{}", prefix, history),
            PrefixPlacement::Postfix => format!("{}\n{}", history, prefix),
        }
    };

    tracing::trace!(
        included = included.len(),
        total = messages.len(),
        chars = prompt.len(),
        "Compiled prompt"
    );

    CompiledPrompt {
        prompt,
        included_messages: included,
        included_assistant_turn_count: assistant_turns,
    }
}
