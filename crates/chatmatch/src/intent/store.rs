//! Intent persistence contract and an in-memory implementation.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::types::{Intent, IntentExample, Response};

/// CRUD over intents, their example phrasings and their responses.
///
/// Implementations surface backend outages as `EngineError::StorageUnavailable`.
#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Examples of `bot_id`'s intents whose key is one of `keys`, in id order.
    async fn find_examples(&self, bot_id: &str, keys: &[String]) -> Result<Vec<IntentExample>>;

    async fn create_intent(
        &self,
        bot_id: &str,
        project_id: Option<&str>,
        canonical_text: &str,
    ) -> Result<Intent>;

    async fn add_example(
        &self,
        intent_id: u64,
        raw_text: &str,
        normalized_key: &str,
    ) -> Result<IntentExample>;

    async fn examples(&self, intent_id: u64) -> Result<Vec<IntentExample>>;

    async fn add_response(&self, intent_id: u64, text: &str) -> Result<Response>;

    /// Most recent response; ties on timestamp go to the higher id.
    async fn latest_response(&self, intent_id: u64) -> Result<Option<Response>>;

    async fn get_intent(&self, intent_id: u64) -> Result<Option<Intent>>;

    async fn list_intents(&self, bot_id: &str) -> Result<Vec<Intent>>;

    /// Move every example of `from` onto `to`. Returns how many moved.
    async fn reassign_examples(&self, from: u64, to: u64) -> Result<usize>;

    /// Delete an intent together with its examples and responses.
    async fn delete_intent(&self, intent_id: u64) -> Result<()>;
}

#[derive(Debug, Default)]
struct IntentTables {
    intents: BTreeMap<u64, Intent>,
    examples: BTreeMap<u64, IntentExample>,
    responses: BTreeMap<u64, Response>,
    next_intent_id: u64,
    next_example_id: u64,
    next_response_id: u64,
}

impl IntentTables {
    fn require_intent(&self, intent_id: u64) -> Result<()> {
        if self.intents.contains_key(&intent_id) {
            Ok(())
        } else {
            Err(EngineError::validation(format!("intent {} does not exist", intent_id)))
        }
    }
}

/// Process-local intent store. Ids start at 1 so `0` stays free to mean
/// "no match" in classifier answers.
#[derive(Debug, Default)]
pub struct InMemoryIntentStore {
    tables: RwLock<IntentTables>,
}

impl InMemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntentStore for InMemoryIntentStore {
    async fn find_examples(&self, bot_id: &str, keys: &[String]) -> Result<Vec<IntentExample>> {
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let tables = self.tables.read();
        Ok(tables
            .examples
            .values()
            .filter(|ex| wanted.contains(ex.normalized_key.as_str()))
            .filter(|ex| {
                tables
                    .intents
                    .get(&ex.intent_id)
                    .map(|intent| intent.bot_id == bot_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn create_intent(
        &self,
        bot_id: &str,
        project_id: Option<&str>,
        canonical_text: &str,
    ) -> Result<Intent> {
        let mut tables = self.tables.write();
        tables.next_intent_id += 1;
        let intent = Intent {
            id: tables.next_intent_id,
            bot_id: bot_id.to_string(),
            project_id: project_id.map(str::to_string),
            canonical_text: canonical_text.to_string(),
        };
        tables.intents.insert(intent.id, intent.clone());
        Ok(intent)
    }

    async fn add_example(
        &self,
        intent_id: u64,
        raw_text: &str,
        normalized_key: &str,
    ) -> Result<IntentExample> {
        let mut tables = self.tables.write();
        tables.require_intent(intent_id)?;
        tables.next_example_id += 1;
        let example = IntentExample {
            id: tables.next_example_id,
            intent_id,
            raw_text: raw_text.to_string(),
            normalized_key: normalized_key.to_string(),
        };
        tables.examples.insert(example.id, example.clone());
        Ok(example)
    }

    async fn examples(&self, intent_id: u64) -> Result<Vec<IntentExample>> {
        let tables = self.tables.read();
        Ok(tables
            .examples
            .values()
            .filter(|ex| ex.intent_id == intent_id)
            .cloned()
            .collect())
    }

    async fn add_response(&self, intent_id: u64, text: &str) -> Result<Response> {
        let mut tables = self.tables.write();
        tables.require_intent(intent_id)?;
        tables.next_response_id += 1;
        let response = Response {
            id: tables.next_response_id,
            intent_id,
            text: text.to_string(),
            created_at: Utc::now(),
        };
        tables.responses.insert(response.id, response.clone());
        Ok(response)
    }

    async fn latest_response(&self, intent_id: u64) -> Result<Option<Response>> {
        let tables = self.tables.read();
        Ok(tables
            .responses
            .values()
            .filter(|r| r.intent_id == intent_id)
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn get_intent(&self, intent_id: u64) -> Result<Option<Intent>> {
        Ok(self.tables.read().intents.get(&intent_id).cloned())
    }

    async fn list_intents(&self, bot_id: &str) -> Result<Vec<Intent>> {
        let tables = self.tables.read();
        Ok(tables
            .intents
            .values()
            .filter(|intent| intent.bot_id == bot_id)
            .cloned()
            .collect())
    }

    async fn reassign_examples(&self, from: u64, to: u64) -> Result<usize> {
        let mut tables = self.tables.write();
        tables.require_intent(to)?;
        let mut moved = 0;
        for example in tables.examples.values_mut().filter(|ex| ex.intent_id == from) {
            example.intent_id = to;
            moved += 1;
        }
        Ok(moved)
    }

    async fn delete_intent(&self, intent_id: u64) -> Result<()> {
        let mut tables = self.tables.write();
        tables.intents.remove(&intent_id);
        tables.examples.retain(|_, ex| ex.intent_id != intent_id);
        tables.responses.retain(|_, r| r.intent_id != intent_id);
        Ok(())
    }
}
