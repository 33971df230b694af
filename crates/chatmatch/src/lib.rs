pub mod chat;
pub mod classifier;
pub mod config;
pub mod error;
pub mod guard;
pub mod intent;
pub mod knowledge;
pub mod llm;
pub mod prompt;
pub mod storage;
pub mod text;
pub mod types;

// Re-export primary types for convenience
pub use chat::{
    ChatEngine, ChatReply, ChatRequest, ReplyOutcome, ReplySource, TrainingRequest, TrainingResult,
};
pub use classifier::{CandidateClassifier, ClassificationResult, SearchState, StepOutcome};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use guard::{ConcurrencyGuard, GuardTicket, GuardedOutcome};
pub use intent::{InMemoryIntentStore, IntentMatch, IntentMatcher, IntentStore};
pub use knowledge::{InMemoryKnowledge, KnowledgeRetriever};
pub use llm::{CompletionProvider, CompletionRequest, ExternalProvider, RequestScheduler};
pub use prompt::{compile, CompiledPrompt, PrefixPlacement, PromptBudget, RoleLabels};
pub use storage::{ConversationStore, InMemoryConversationStore};
pub use text::{comparison_key, normalize, Direction, VariantGenerator};
pub use types::{Candidate, Conversation, Intent, Message, MessageType, NewMessage};

pub use uuid::Uuid;
