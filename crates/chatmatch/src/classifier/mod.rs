//! Candidate-narrowing classifier.
//!
//! Candidates are paged through the provider as a few-shot conversation: each
//! one becomes a user turn holding its text followed by an assistant turn
//! holding its id. The live utterance is appended as the final user turn and
//! the model answers with an id, or `0` when nothing in the batch fits. Pages
//! are cut by the prompt compiler, so a batch is however many candidates fit
//! in the classifier budget.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::ClassifierConfig;
use crate::error::{EngineError, Result};
use crate::llm::{CompletionProvider, CompletionRequest};
use crate::prompt::{self, CompiledPrompt, PromptBudget};
use crate::types::{Candidate, Message, MessageType};

const INSTRUCTION: &str = "Reply with the number of the example above that means the same as the \
     last message, or 0 if none of them does.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchState {
    Searching,
    /// Every candidate was presented.
    Exhausted,
    /// `max_matches` results were collected.
    Satisfied,
}

/// Result of one provider round.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Matched(u64),
    NoMatch,
    ProviderError(EngineError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub matches: Vec<Candidate>,
    pub state: SearchState,
    pub provider_calls: usize,
}

pub struct CandidateClassifier {
    provider: Arc<dyn CompletionProvider>,
    budget: PromptBudget,
    max_tokens: usize,
    retry_backoff: Duration,
    retry_deadline: Duration,
}

impl CandidateClassifier {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        budget: PromptBudget,
        config: &ClassifierConfig,
    ) -> Self {
        Self {
            provider,
            budget,
            max_tokens: config.max_tokens,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            retry_deadline: Duration::from_secs(config.retry_deadline_secs),
        }
    }

    /// Find up to `max_matches` candidates that mean the same as `utterance`.
    pub async fn classify(
        &self,
        utterance: &str,
        candidates: &[Candidate],
        max_matches: usize,
    ) -> Result<ClassificationResult> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(EngineError::validation("utterance is empty"));
        }

        let mut result = ClassificationResult {
            matches: Vec::new(),
            state: SearchState::Searching,
            provider_calls: 0,
        };
        if candidates.is_empty() || max_matches == 0 {
            result.state = SearchState::Exhausted;
            return Ok(result);
        }

        let mut searched = 0usize;
        let mut failing_since: Option<Instant> = None;

        while result.state == SearchState::Searching {
            let remaining = &candidates[searched..];
            let compiled = self.batch_prompt(utterance, remaining);
            let presented = compiled.included_assistant_turn_count;

            if presented == 0 {
                tracing::warn!(
                    candidate_id = remaining[0].id,
                    max_length = self.budget.max_length,
                    "Candidate does not fit the classifier budget, skipping"
                );
                searched += 1;
            } else {
                result.provider_calls += 1;
                match self.step(&compiled.prompt, &remaining[..presented]).await {
                    StepOutcome::ProviderError(error) if error.is_transient() => {
                        let since = *failing_since.get_or_insert_with(Instant::now);
                        if since.elapsed() + self.retry_backoff > self.retry_deadline {
                            return Err(EngineError::Timeout(format!(
                                "classifier gave up after {} calls: {}",
                                result.provider_calls, error
                            )));
                        }
                        tracing::warn!(
                            error = %error,
                            backoff_ms = self.retry_backoff.as_millis() as u64,
                            "Classifier call failed, retrying batch"
                        );
                        tokio::time::sleep(self.retry_backoff).await;
                        continue;
                    }
                    StepOutcome::ProviderError(error) => return Err(error),
                    StepOutcome::Matched(id) => {
                        failing_since = None;
                        if !result.matches.iter().any(|c| c.id == id) {
                            let batch = &remaining[..presented];
                            if let Some(candidate) = batch.iter().find(|c| c.id == id) {
                                result.matches.push(candidate.clone());
                            }
                        }
                        searched += presented;
                    }
                    StepOutcome::NoMatch => {
                        failing_since = None;
                        searched += presented;
                    }
                }
            }

            if result.matches.len() >= max_matches {
                result.state = SearchState::Satisfied;
            } else if searched >= candidates.len() {
                result.state = SearchState::Exhausted;
            }
        }

        tracing::info!(
            matches = result.matches.len(),
            provider_calls = result.provider_calls,
            state = ?result.state,
            "Classification finished"
        );
        Ok(result)
    }

    async fn step(&self, prompt: &str, presented: &[Candidate]) -> StepOutcome {
        let request = CompletionRequest::prompt(prompt, self.max_tokens)
            .with_stop(self.budget.stop_marker.clone());
        match self.provider.complete(&request).await {
            Ok(answer) => match parse_answer(&answer, presented) {
                Some(id) => StepOutcome::Matched(id),
                None => {
                    let preview: String = answer.chars().take(40).collect();
                    tracing::debug!(answer = %preview, "No candidate matched");
                    StepOutcome::NoMatch
                }
            },
            Err(error) => StepOutcome::ProviderError(error),
        }
    }

    /// Build the few-shot prompt. The next candidate in list order is the
    /// most recent turn, so the compiler keeps candidates in order.
    fn batch_prompt(&self, utterance: &str, remaining: &[Candidate]) -> CompiledPrompt {
        let mut shots = Vec::with_capacity(remaining.len() * 2);
        for candidate in remaining.iter().rev() {
            shots.push(Message::transient(MessageType::User, candidate.text.clone()));
            shots.push(Message::transient(MessageType::Assistant, candidate.id.to_string()));
        }

        let separator = self.budget.turn_separator();
        let instruction = format!(
            "{}{}{}{}:\n{}{}",
            separator,
            INSTRUCTION,
            separator,
            self.budget.labels.user,
            utterance,
            self.budget.assistant_cue()
        );
        prompt::compile(&shots, &instruction, &self.budget)
    }
}

/// Read the model's answer as a candidate id. Anything that is not one of
/// the presented ids counts as no match.
fn parse_answer(answer: &str, presented: &[Candidate]) -> Option<u64> {
    let digits: String = answer.chars().filter(char::is_ascii_digit).collect();
    let id = digits.parse::<u64>().ok()?;
    if id == 0 {
        return None;
    }
    let known: HashSet<u64> = presented.iter().map(|c| c.id).collect();
    known.contains(&id).then_some(id)
}
