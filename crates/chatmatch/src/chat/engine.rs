use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{ChatReply, ChatRequest, ReplyOutcome, ReplySource, TrainingRequest, TrainingResult};
use crate::classifier::{CandidateClassifier, ClassificationResult};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::guard::{ConcurrencyGuard, GuardedOutcome};
use crate::intent::{IntentMatch, IntentMatcher, IntentStore};
use crate::knowledge::KnowledgeRetriever;
use crate::llm::{CompletionProvider, CompletionRequest};
use crate::prompt::{self, CompiledPrompt};
use crate::storage::ConversationStore;
use crate::types::{Candidate, Message, MessageType, NewMessage};

/// Front door of the engine. Owns the collaborators and the per-conversation
/// guard; every operation the surrounding application needs goes through here.
pub struct ChatEngine {
    config: EngineConfig,
    conversations: Arc<dyn ConversationStore>,
    matcher: IntentMatcher,
    classifier: CandidateClassifier,
    provider: Arc<dyn CompletionProvider>,
    knowledge: Option<Arc<dyn KnowledgeRetriever>>,
    guard: ConcurrencyGuard,
}

impl ChatEngine {
    pub fn new(
        config: EngineConfig,
        conversations: Arc<dyn ConversationStore>,
        intents: Arc<dyn IntentStore>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let classifier = CandidateClassifier::new(
            provider.clone(),
            config.prompt.classifier_budget(&config.classifier),
            &config.classifier,
        );

        tracing::info!(
            provider = %provider.name(),
            prompt_max_length = config.prompt.max_length,
            classifier_max_length = config.classifier.max_length,
            "ChatEngine initialized"
        );

        Ok(Self {
            config,
            conversations,
            matcher: IntentMatcher::new(intents),
            classifier,
            provider,
            knowledge: None,
            guard: ConcurrencyGuard::new(),
        })
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeRetriever>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    /// Pack `messages` into a chat prompt under the configured budget.
    pub fn compile_prompt(&self, messages: &[Message], prefix: &str) -> CompiledPrompt {
        prompt::compile(messages, prefix, &self.config.prompt.budget())
    }

    pub async fn match_intent(
        &self,
        bot_id: &str,
        project_id: Option<&str>,
        intent_texts: &[String],
    ) -> Result<IntentMatch> {
        self.matcher.match_or_create(bot_id, project_id, intent_texts).await
    }

    pub async fn classify_against_candidates(
        &self,
        utterance: &str,
        candidates: &[Candidate],
        max_matches: usize,
    ) -> Result<ClassificationResult> {
        self.classifier.classify(utterance, candidates, max_matches).await
    }

    /// Run `operation` as the only active operation of the conversation.
    pub async fn guarded_run<T, F, Fut>(
        &self,
        conversation_id: &str,
        operation: F,
    ) -> Result<GuardedOutcome<T>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.guard.guarded_run(conversation_id, operation).await
    }

    /// Answer one user message. A newer request for the same conversation
    /// pre-empts this one, in which case nothing is persisted.
    pub async fn reply(&self, request: ChatRequest) -> Result<ReplyOutcome> {
        if request.text.trim().is_empty() {
            return Err(EngineError::validation("message text is empty"));
        }

        let conversation_id = request.conversation_id.clone();
        let outcome = self
            .guard
            .guarded_run(&conversation_id, |token| async move {
                self.respond(&request, &token).await
            })
            .await?;

        Ok(match outcome {
            GuardedOutcome::Completed(reply) => ReplyOutcome::Replied(reply),
            GuardedOutcome::Cancelled => {
                tracing::info!(
                    conversation_id = %conversation_id,
                    "Reply cancelled by a newer request"
                );
                ReplyOutcome::Cancelled
            }
        })
    }

    /// Stored response for the intent `text` resolves to, if any.
    pub async fn answer_faq(&self, bot_id: &str, text: &str) -> Result<Option<String>> {
        Ok(self.faq_answer(bot_id, text).await?.map(|(_, answer)| answer))
    }

    /// Attach phrasings and optionally a response to an intent, merging the
    /// intents the phrasings already belonged to when asked.
    pub async fn train_intent(&self, request: TrainingRequest) -> Result<TrainingResult> {
        let intent_match = self
            .matcher
            .match_or_create(&request.bot_id, request.project_id.as_deref(), &request.texts)
            .await?;
        let store = self.matcher.store();

        let response = match request.response.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                Some(store.add_response(intent_match.intent_id, text).await?)
            }
            _ => None,
        };

        let mut deleted_intent_ids = Vec::new();
        if request.merge {
            for old in &intent_match.merged_old_intent_ids {
                let moved = store.reassign_examples(*old, intent_match.intent_id).await?;
                store.delete_intent(*old).await?;
                tracing::info!(
                    from = *old,
                    into = intent_match.intent_id,
                    moved_examples = moved,
                    "Merged intent"
                );
                deleted_intent_ids.push(*old);
            }
        }

        Ok(TrainingResult {
            intent_match,
            response,
            deleted_intent_ids,
        })
    }

    pub async fn history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.conversations.read(conversation_id).await
    }

    /// Cancel whatever is running and delete the conversation's messages.
    pub async fn clear_conversation(&self, conversation_id: &str) -> Result<()> {
        self.guard.cancel(conversation_id);
        self.conversations.clear(conversation_id).await?;
        tracing::info!(conversation_id = %conversation_id, "Conversation cleared");
        Ok(())
    }

    pub fn cancel_conversation(&self, conversation_id: &str) -> bool {
        self.guard.cancel(conversation_id)
    }

    async fn respond(&self, request: &ChatRequest, token: &CancellationToken) -> Result<ChatReply> {
        let text = request.text.trim();

        let (source, intent_id, answer) = match self.stored_answer(&request.bot_id, text).await? {
            Some((source, intent_id, answer)) => (source, Some(intent_id), answer),
            None => {
                let generated = self.generate(&request.conversation_id, text).await?;
                (ReplySource::Generated, None, generated)
            }
        };

        let mut reply = ChatReply {
            text: answer,
            source,
            intent_id,
            messages: Vec::new(),
        };
        if token.is_cancelled() {
            return Ok(reply);
        }

        self.conversations
            .open(&request.conversation_id, None, Some(&request.bot_id))
            .await?;
        reply.messages = self
            .conversations
            .append(
                &request.conversation_id,
                vec![NewMessage::user(text), NewMessage::assistant(reply.text.clone())],
            )
            .await?;

        tracing::info!(
            conversation_id = %request.conversation_id,
            source = ?reply.source,
            intent_id = ?reply.intent_id,
            "Replied"
        );
        Ok(reply)
    }

    async fn stored_answer(
        &self,
        bot_id: &str,
        text: &str,
    ) -> Result<Option<(ReplySource, u64, String)>> {
        let chat = &self.config.chat;
        if chat.faq_first {
            if let Some((intent_id, answer)) = self.faq_answer(bot_id, text).await? {
                return Ok(Some((ReplySource::Faq, intent_id, answer)));
            }
        }
        if !chat.classifier_fallback {
            return Ok(None);
        }

        let store = self.matcher.store();
        let candidates: Vec<Candidate> = store
            .list_intents(bot_id)
            .await?
            .iter()
            .map(Candidate::from)
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let classified = match self.classifier.classify(text, &candidates, 1).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Classifier failed, falling back to generation");
                return Ok(None);
            }
        };
        let Some(candidate) = classified.matches.first() else {
            return Ok(None);
        };
        Ok(store
            .latest_response(candidate.id)
            .await?
            .map(|response| (ReplySource::Classified, candidate.id, response.text)))
    }

    async fn faq_answer(&self, bot_id: &str, text: &str) -> Result<Option<(u64, String)>> {
        let Some(intent_id) = self.matcher.lookup(bot_id, text).await? else {
            return Ok(None);
        };
        let response = self.matcher.store().latest_response(intent_id).await?;
        if response.is_none() {
            tracing::debug!(intent_id, "Matched intent has no response yet");
        }
        Ok(response.map(|r| (intent_id, r.text)))
    }

    async fn generate(&self, conversation_id: &str, text: &str) -> Result<String> {
        let mut messages = self.conversations.read(conversation_id).await?;
        messages.push(Message::transient(MessageType::User, text));

        let prefix = self.system_prefix(text).await;
        let mut budget = self.config.prompt.budget();
        let cue = budget.assistant_cue();
        budget.max_length = budget.max_length.saturating_sub(cue.chars().count());

        let compiled = prompt::compile(&messages, &prefix, &budget);
        tracing::debug!(
            conversation_id = %conversation_id,
            included = compiled.included_messages.len(),
            history = messages.len(),
            "Compiled conversation prompt"
        );

        let provider = &self.config.provider;
        let prompt = format!("{}{}", compiled.prompt, cue);
        let request = CompletionRequest::prompt(prompt, provider.max_tokens)
            .with_temperature(provider.temperature)
            .with_stop(budget.stop_marker.clone());
        let answer = self.provider.complete(&request).await?;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(EngineError::ProviderFatal("completion was empty".to_string()));
        }
        Ok(answer.to_string())
    }

    async fn system_prefix(&self, text: &str) -> String {
        let system_prompt = self.config.chat.system_prompt.clone();
        let limit = self.config.chat.knowledge_snippets;
        let Some(knowledge) = self.knowledge.as_ref().filter(|_| limit > 0) else {
            return system_prompt;
        };

        match knowledge.retrieve(text, limit).await {
            Ok(snippets) if !snippets.is_empty() => {
                let listed: Vec<String> =
                    snippets.iter().map(|s| format!("- {}", s.trim())).collect();
                format!("{}\n\nRelevant information:\n{}", system_prompt, listed.join("\n"))
            }
            Ok(_) => system_prompt,
            Err(e) => {
                tracing::warn!(error = %e, "Knowledge retrieval failed, continuing without it");
                system_prompt
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    use crate::intent::InMemoryIntentStore;
    use crate::knowledge::InMemoryKnowledge;
    use crate::llm::CompletionInput;
    use crate::storage::InMemoryConversationStore;

    struct FnProvider<F> {
        respond: F,
        prompts: Mutex<Vec<String>>,
    }

    impl<F> FnProvider<F>
    where
        F: Fn(&str) -> Result<String> + Send + Sync,
    {
        fn new(respond: F) -> Arc<Self> {
            Arc::new(Self { respond, prompts: Mutex::new(Vec::new()) })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().len()
        }
    }

    #[async_trait]
    impl<F> CompletionProvider for FnProvider<F>
    where
        F: Fn(&str) -> Result<String> + Send + Sync,
    {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            let CompletionInput::Prompt(prompt) = &request.input else {
                return Err(EngineError::ProviderFatal("expected a prompt".into()));
            };
            self.prompts.lock().push(prompt.clone());
            (self.respond)(prompt)
        }
    }

    fn engine_with(config: EngineConfig, provider: Arc<dyn CompletionProvider>) -> ChatEngine {
        ChatEngine::new(
            config,
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(InMemoryIntentStore::new()),
            provider,
        )
        .unwrap()
    }

    fn request(conversation_id: &str, text: &str) -> ChatRequest {
        ChatRequest {
            conversation_id: conversation_id.to_string(),
            bot_id: "shop-bot".to_string(),
            text: text.to_string(),
        }
    }

    fn training(texts: &[&str], response: Option<&str>, merge: bool) -> TrainingRequest {
        TrainingRequest {
            bot_id: "shop-bot".to_string(),
            project_id: None,
            texts: texts.iter().map(|t| t.to_string()).collect(),
            response: response.map(str::to_string),
            merge,
        }
    }

    fn replied(outcome: ReplyOutcome) -> ChatReply {
        match outcome {
            ReplyOutcome::Replied(reply) => reply,
            ReplyOutcome::Cancelled => panic!("reply was cancelled"),
        }
    }

    #[tokio::test]
    async fn test_generated_reply_is_persisted_and_fed_back() {
        let provider = FnProvider::new(|_: &str| Ok(" Hello there! ".to_string()));
        let engine = engine_with(EngineConfig::default(), provider.clone());

        let reply = replied(engine.reply(request("c1", "Hi")).await.unwrap());
        assert_eq!(reply.source, ReplySource::Generated);
        assert_eq!(reply.text, "Hello there!");
        assert_eq!(reply.messages.len(), 2);

        engine.reply(request("c1", "What's new?")).await.unwrap();
        let history = engine.history("c1").await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[1].message_type, MessageType::Assistant);
        assert_eq!(history[3].previous_message_id, Some(history[2].id));

        let second_prompt = provider.prompts.lock()[1].clone();
        assert!(second_prompt.starts_with(&engine.config().chat.system_prompt));
        assert!(second_prompt.contains("User:\nHi"));
        assert!(second_prompt.contains("Assistant:\nHello there!"));
        assert!(second_prompt.ends_with("User:\nWhat's new?\n\n###\n\nAssistant:\n"));
    }

    #[tokio::test]
    async fn test_faq_answer_skips_the_model() {
        let provider = FnProvider::new(|_: &str| Ok("generated".to_string()));
        let engine = engine_with(EngineConfig::default(), provider.clone());
        engine
            .train_intent(training(&["What is the price?"], Some("Ten euros."), false))
            .await
            .unwrap();

        let reply = replied(engine.reply(request("c1", "what's the price")).await.unwrap());

        assert_eq!(reply.source, ReplySource::Faq);
        assert_eq!(reply.text, "Ten euros.");
        assert_eq!(provider.calls(), 0);
        assert_eq!(
            engine.answer_faq("shop-bot", "What is the price").await.unwrap().as_deref(),
            Some("Ten euros.")
        );
        assert_eq!(engine.answer_faq("other-bot", "What is the price").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_classifier_picks_intent_when_phrasing_is_new() {
        let provider = FnProvider::new(|prompt: &str| {
            if prompt.contains("Reply with the number") {
                Ok("1".to_string())
            } else {
                Ok("generated".to_string())
            }
        });
        let engine = engine_with(EngineConfig::default(), provider.clone());
        let trained = engine
            .train_intent(training(&["Where is the shop?"], Some("On Main Street."), false))
            .await
            .unwrap();
        assert_eq!(trained.intent_match.intent_id, 1);

        let reply = replied(
            engine
                .reply(request("c1", "where can I find your store"))
                .await
                .unwrap(),
        );

        assert_eq!(reply.source, ReplySource::Classified);
        assert_eq!(reply.intent_id, Some(1));
        assert_eq!(reply.text, "On Main Street.");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_newer_request_cancels_older_reply() {
        struct GateProvider {
            calls: AtomicUsize,
            started: Notify,
            release: Notify,
        }

        #[async_trait]
        impl CompletionProvider for GateProvider {
            async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    self.started.notify_one();
                    self.release.notified().await;
                    return Ok("first answer".to_string());
                }
                Ok("second answer".to_string())
            }
        }

        let provider = Arc::new(GateProvider {
            calls: AtomicUsize::new(0),
            started: Notify::new(),
            release: Notify::new(),
        });
        let engine = Arc::new(engine_with(EngineConfig::default(), provider.clone()));

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.reply(request("c1", "first question")).await })
        };
        provider.started.notified().await;

        let second = replied(engine.reply(request("c1", "second question")).await.unwrap());
        provider.release.notify_one();

        assert_eq!(first.await.unwrap().unwrap(), ReplyOutcome::Cancelled);
        assert_eq!(second.text, "second answer");

        let history = engine.history("c1").await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["second question", "second answer"]);
    }

    #[tokio::test]
    async fn test_train_intent_merges_duplicates() {
        let provider = FnProvider::new(|_: &str| Ok("generated".to_string()));
        let engine = engine_with(EngineConfig::default(), provider);
        let price = engine
            .train_intent(training(&["What is the price?"], None, false))
            .await
            .unwrap();
        let cost = engine
            .train_intent(training(&["How much does it cost?"], None, false))
            .await
            .unwrap();
        let price_id = price.intent_match.intent_id;
        let cost_id = cost.intent_match.intent_id;

        let merged = engine
            .train_intent(training(
                &["what's the price", "how much does it cost"],
                Some("Ten euros."),
                true,
            ))
            .await
            .unwrap();

        assert_eq!(merged.intent_match.intent_id, price_id);
        assert_eq!(merged.deleted_intent_ids, vec![cost_id]);
        assert!(merged.response.is_some());

        let store = engine.matcher.store();
        assert_eq!(store.list_intents("shop-bot").await.unwrap().len(), 1);
        assert_eq!(
            engine.answer_faq("shop-bot", "How much does it cost").await.unwrap().as_deref(),
            Some("Ten euros.")
        );
    }

    #[tokio::test]
    async fn test_knowledge_snippets_extend_prefix() {
        let provider = FnProvider::new(|_: &str| Ok("Five days.".to_string()));
        let mut config = EngineConfig::default();
        config.chat.knowledge_snippets = 2;
        let knowledge = Arc::new(InMemoryKnowledge::new(vec![
            "Shipping to Norway takes five days.".to_string(),
        ]));
        let engine = engine_with(config, provider.clone()).with_knowledge(knowledge);

        engine.reply(request("c1", "How long is shipping to Norway?")).await.unwrap();

        let prompt = provider.prompts.lock()[0].clone();
        assert!(prompt.contains("Relevant information:\n- Shipping to Norway takes five days."));
    }

    #[tokio::test]
    async fn test_clear_and_validation() {
        let provider = FnProvider::new(|_: &str| Ok("ok".to_string()));
        let engine = engine_with(EngineConfig::default(), provider.clone());
        engine.reply(request("c1", "Hi")).await.unwrap();

        engine.clear_conversation("c1").await.unwrap();
        assert!(engine.history("c1").await.unwrap().is_empty());
        assert!(!engine.cancel_conversation("c1"));

        assert!(matches!(
            engine.reply(request("c1", "   ")).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            engine.reply(request("not valid!", "Hi")).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_history_untouched() {
        let provider =
            FnProvider::new(|_: &str| Err(EngineError::ProviderFatal("401".to_string())));
        let engine = engine_with(EngineConfig::default(), provider);

        let result = engine.reply(request("c1", "Hi")).await;

        assert!(matches!(result, Err(EngineError::ProviderFatal(_))));
        assert!(engine.history("c1").await.unwrap().is_empty());
        assert!(!engine.guard().is_active("c1"));
    }

    #[tokio::test]
    async fn test_guarded_run_shares_the_reply_guard() {
        let provider = FnProvider::new(|_: &str| Ok("ok".to_string()));
        let engine = engine_with(EngineConfig::default(), provider);
        let inner = &engine;

        let outcome = engine
            .guarded_run("c1", |token| async move {
                assert!(inner.guard().is_active("c1"));
                assert!(inner.cancel_conversation("c1"));
                Ok(token.is_cancelled())
            })
            .await
            .unwrap();

        assert_eq!(outcome, GuardedOutcome::Cancelled);
        assert!(!engine.guard().is_active("c1"));
    }

    #[test]
    fn test_compile_prompt_uses_configured_budget() {
        let provider = FnProvider::new(|_: &str| Ok("ok".to_string()));
        let mut config = EngineConfig::default();
        config.prompt.max_length = 60;
        let engine = engine_with(config, provider);
        let history = vec![
            Message::transient(MessageType::User, "Hi"),
            Message::transient(MessageType::Assistant, "Hello"),
            Message::transient(MessageType::User, "What's the price?"),
        ];

        let compiled = engine.compile_prompt(&history, "Bot.\n");

        assert_eq!(compiled.prompt, "Bot.\n\nUser:\nWhat's the price?");
        assert_eq!(compiled.included_assistant_turn_count, 0);
    }
}
