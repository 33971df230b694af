//! Knowledge snippets that can be folded into the generated-reply prefix.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::text::comparison_key;

#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Up to `limit` snippets relevant to `query`, best first.
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>>;
}

/// Term-overlap retriever over a fixed list of snippets.
#[derive(Debug, Default)]
pub struct InMemoryKnowledge {
    snippets: RwLock<Vec<String>>,
}

impl InMemoryKnowledge {
    pub fn new(snippets: Vec<String>) -> Self {
        Self { snippets: RwLock::new(snippets) }
    }

    pub fn add(&self, snippet: impl Into<String>) {
        self.snippets.write().push(snippet.into());
    }
}

#[async_trait]
impl KnowledgeRetriever for InMemoryKnowledge {
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let query_key = comparison_key(query);
        let terms: Vec<&str> = query_key.split_whitespace().filter(|t| t.len() > 2).collect();
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let snippets = self.snippets.read();
        let mut scored: Vec<(usize, usize)> = snippets
            .iter()
            .enumerate()
            .filter_map(|(index, snippet)| {
                let key = comparison_key(snippet);
                let hits = terms
                    .iter()
                    .filter(|t| key.split_whitespace().any(|w| w == **t))
                    .count();
                (hits > 0).then_some((hits, index))
            })
            .collect();
        // stable: equal scores keep insertion order
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, index)| snippets[index].clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retrieve_ranks_by_overlap() {
        let knowledge = InMemoryKnowledge::new(vec![
            "Shipping is free over 50 euros.".to_string(),
            "The shop opens at nine.".to_string(),
            "Shipping to Norway takes five days, shipping elsewhere three.".to_string(),
        ]);

        let hits = knowledge.retrieve("How long does shipping to Norway take?", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].contains("Norway"));
        assert!(hits[1].contains("free"));
    }

    #[tokio::test]
    async fn test_no_terms_no_hits() {
        let knowledge = InMemoryKnowledge::default();
        knowledge.add("anything");
        assert!(knowledge.retrieve("a b", 3).await.unwrap().is_empty());
    }
}
