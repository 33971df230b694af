//! Resolves utterances to stored intents through their lexical variants.
//!
//! Contraction expansion can make one utterance hit keys that belong to
//! historically distinct intents. An exact hit on the utterance's own key
//! wins; otherwise every matched example casts one vote for its intent.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::store::IntentStore;
use crate::error::{EngineError, Result};
use crate::text::{comparison_key, VariantGenerator};
use crate::types::IntentExample;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMatch {
    pub intent_id: u64,
    /// Other intents the texts resolved to, in order of first encounter.
    /// Callers decide whether to merge them into `intent_id`.
    pub merged_old_intent_ids: Vec<u64>,
    pub created: bool,
}

#[derive(Debug, Default)]
struct Resolution {
    winner: Option<u64>,
    encountered: Vec<u64>,
}

pub struct IntentMatcher {
    store: Arc<dyn IntentStore>,
    variants: Arc<VariantGenerator>,
}

impl IntentMatcher {
    pub fn new(store: Arc<dyn IntentStore>) -> Self {
        Self {
            store,
            variants: Arc::new(VariantGenerator::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn IntentStore> {
        &self.store
    }

    /// Find the intent `intent_texts` belong to, creating one when none of
    /// them matches, and record any phrasing the intent does not know yet.
    ///
    /// Never deletes anything. Two callers racing to create the same new
    /// intent can both succeed and produce duplicates.
    pub async fn match_or_create(
        &self,
        bot_id: &str,
        project_id: Option<&str>,
        intent_texts: &[String],
    ) -> Result<IntentMatch> {
        if intent_texts.is_empty() {
            return Err(EngineError::validation("no intent texts given"));
        }
        if let Some(blank) = intent_texts.iter().position(|t| comparison_key(t).is_empty()) {
            return Err(EngineError::validation(format!("intent text #{} is empty", blank + 1)));
        }

        let mut target: Option<u64> = None;
        let mut encountered: Vec<u64> = Vec::new();
        for text in intent_texts {
            let resolution = self.resolve(bot_id, text).await?;
            for id in resolution.encountered {
                if !encountered.contains(&id) {
                    encountered.push(id);
                }
            }
            if target.is_none() {
                target = resolution.winner;
            }
        }

        let (intent_id, created) = match target {
            Some(id) => (id, false),
            None => {
                let intent = self
                    .store
                    .create_intent(bot_id, project_id, intent_texts[0].trim())
                    .await?;
                tracing::info!(intent_id = intent.id, bot_id = %bot_id, "Created intent");
                (intent.id, true)
            }
        };

        let mut known_keys: HashSet<String> = self
            .store
            .examples(intent_id)
            .await?
            .into_iter()
            .map(|ex| ex.normalized_key)
            .collect();
        for text in intent_texts {
            let key = comparison_key(text);
            if known_keys.insert(key.clone()) {
                self.store.add_example(intent_id, text.trim(), &key).await?;
            }
        }

        let merged_old_intent_ids: Vec<u64> =
            encountered.into_iter().filter(|id| *id != intent_id).collect();

        tracing::debug!(
            intent_id,
            created,
            merged = ?merged_old_intent_ids,
            texts = intent_texts.len(),
            "Matched intent"
        );

        Ok(IntentMatch {
            intent_id,
            merged_old_intent_ids,
            created,
        })
    }

    /// Resolve one utterance without writing anything.
    pub async fn lookup(&self, bot_id: &str, utterance: &str) -> Result<Option<u64>> {
        if comparison_key(utterance).is_empty() {
            return Err(EngineError::validation("utterance is empty"));
        }
        Ok(self.resolve(bot_id, utterance).await?.winner)
    }

    /// Variant generation is CPU-bound, so cache misses run on the blocking
    /// pool instead of a runtime worker.
    async fn variant_keys(&self, text: &str) -> Result<BTreeSet<String>> {
        if let Some(cached) = self.variants.cached(text) {
            return Ok(cached);
        }
        let generator = self.variants.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || generator.variants(&text))
            .await
            .map_err(|e| EngineError::Internal(format!("variant generation failed: {}", e)))
    }

    async fn resolve(&self, bot_id: &str, text: &str) -> Result<Resolution> {
        let key = comparison_key(text);
        let keys: Vec<String> = self.variant_keys(text).await?.into_iter().collect();
        let examples = self.store.find_examples(bot_id, &keys).await?;
        if examples.is_empty() {
            return Ok(Resolution::default());
        }

        let mut encountered = Vec::new();
        for example in &examples {
            if !encountered.contains(&example.intent_id) {
                encountered.push(example.intent_id);
            }
        }

        let winner = exact_match(&examples, &key).or_else(|| majority_vote(&examples));
        Ok(Resolution { winner, encountered })
    }
}

/// The intent owning the literal key, when exactly one intent owns it.
fn exact_match(examples: &[IntentExample], key: &str) -> Option<u64> {
    let owners: HashSet<u64> = examples
        .iter()
        .filter(|ex| ex.normalized_key == key)
        .map(|ex| ex.intent_id)
        .collect();
    if owners.len() == 1 {
        owners.into_iter().next()
    } else {
        None
    }
}

/// Intent with the most matching examples; ties go to the lowest intent id.
fn majority_vote(examples: &[IntentExample]) -> Option<u64> {
    let mut votes: HashMap<u64, usize> = HashMap::new();
    for example in examples {
        *votes.entry(example.intent_id).or_insert(0) += 1;
    }
    votes
        .into_iter()
        .max_by(|(id_a, count_a), (id_b, count_b)| count_a.cmp(count_b).then(id_b.cmp(id_a)))
        .map(|(id, _)| id)
}
