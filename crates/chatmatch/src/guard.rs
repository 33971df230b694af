//! Single-flight guard per conversation.
//!
//! At most one operation is active for a conversation. Starting a new one
//! cancels the previous token first, so the latest request always wins.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::validate_conversation_id;

#[derive(Debug)]
struct ActiveOperation {
    generation: u64,
    token: CancellationToken,
}

/// Handle for one registered operation.
#[derive(Debug, Clone)]
pub struct GuardTicket {
    pub conversation_id: String,
    pub generation: u64,
    pub token: CancellationToken,
}

impl GuardTicket {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardedOutcome<T> {
    Completed(T),
    /// A newer operation or an explicit cancel pre-empted this one.
    Cancelled,
}

#[derive(Debug, Default)]
pub struct ConcurrencyGuard {
    active: DashMap<String, ActiveOperation>,
    generations: AtomicU64,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new operation, cancelling whatever was running before.
    pub fn begin(&self, conversation_id: &str) -> Result<GuardTicket> {
        validate_conversation_id(conversation_id)?;
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();

        let previous = self.active.insert(
            conversation_id.to_string(),
            ActiveOperation { generation, token: token.clone() },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
            tracing::info!(
                conversation_id = %conversation_id,
                cancelled_generation = previous.generation,
                generation,
                "Pre-empted running operation"
            );
        }

        Ok(GuardTicket {
            conversation_id: conversation_id.to_string(),
            generation,
            token,
        })
    }

    /// Clear the active flag unconditionally.
    pub fn end(&self, conversation_id: &str) {
        self.active.remove(conversation_id);
    }

    /// Clear the active flag only if `ticket` is still the registered
    /// operation.
    pub fn finish(&self, ticket: &GuardTicket) {
        self.active
            .remove_if(&ticket.conversation_id, |_, op| op.generation == ticket.generation);
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.active.contains_key(conversation_id)
    }

    /// Signal the running operation and unregister it. Returns whether
    /// anything was running.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.active.remove(conversation_id) {
            Some((_, op)) => {
                op.token.cancel();
                tracing::info!(
                    conversation_id = %conversation_id,
                    generation = op.generation,
                    "Cancelled operation"
                );
                true
            }
            None => false,
        }
    }

    /// Run `operation` as the active operation of the conversation. If it is
    /// pre-empted before finishing, its result is dropped.
    pub async fn guarded_run<T, F, Fut>(
        &self,
        conversation_id: &str,
        operation: F,
    ) -> Result<GuardedOutcome<T>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ticket = self.begin(conversation_id)?;
        let token = ticket.token.clone();

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Ok(GuardedOutcome::Cancelled),
            result = operation(ticket.token.clone()) => {
                if ticket.is_cancelled() {
                    Ok(GuardedOutcome::Cancelled)
                } else {
                    result.map(GuardedOutcome::Completed)
                }
            }
        };

        self.finish(&ticket);
        outcome
    }
}
