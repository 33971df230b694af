//! Lexical variant generation.
//!
//! A training phrase and a live utterance may spell the same idea with
//! different contractions ("I don't know" / "I do not know"). Expanding both
//! sides into every surface form lets exact key lookups find each other.

use std::collections::{BTreeSet, HashSet};
use std::num::NonZeroUsize;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::contractions::CONTRACTIONS;
use super::normalize::comparison_key;

/// Bounds recursion on pathological inputs with many stacked contractions.
const MAX_EXPANSION_DEPTH: usize = 8;
/// Upper bound on the variants kept for one utterance. Every ambiguous
/// contraction multiplies the combinations, so chatty input is truncated.
pub const MAX_VARIANTS: usize = 128;
const DEFAULT_CACHE_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// "don't" → "do not"
    ToLong,
    /// "do not" → "don't"
    ToShort,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::ToLong => Direction::ToShort,
            Direction::ToShort => Direction::ToLong,
        }
    }
}

/// Every surface form reachable from `text` by applying contraction rules in
/// one direction, up to [`MAX_VARIANTS`] of them.
///
/// Each whole-word match produces one variant per alternative, and every
/// variant is re-expanded so stacked contractions are all rewritten. When no
/// rule matches, the normalized input is the only variant.
pub fn expand(text: &str, direction: Direction) -> BTreeSet<String> {
    let (variants, truncated) = expand_bounded(text, direction, MAX_VARIANTS);
    if truncated {
        tracing::warn!(limit = MAX_VARIANTS, ?direction, "Variant expansion truncated");
    }
    variants
}

/// Expansion that stops after `limit` variants. The flag reports whether
/// the limit cut it short.
fn expand_bounded(text: &str, direction: Direction, limit: usize) -> (BTreeSet<String>, bool) {
    let normalized = comparison_key(text);
    let limit = limit.max(1);
    let mut variants = BTreeSet::new();
    let mut visited = HashSet::new();
    visited.insert(normalized.clone());

    let truncated = !expand_into(&normalized, direction, 0, limit, &mut visited, &mut variants);

    if variants.is_empty() {
        variants.insert(normalized);
    }
    (variants, truncated)
}

/// Returns false once `limit` is reached; nothing more is inserted after that.
fn expand_into(
    text: &str,
    direction: Direction,
    depth: usize,
    limit: usize,
    visited: &mut HashSet<String>,
    variants: &mut BTreeSet<String>,
) -> bool {
    if depth >= MAX_EXPANSION_DEPTH {
        return true;
    }

    let tokens: Vec<&str> = text.split(' ').filter(|t| !t.is_empty()).collect();

    for rule in CONTRACTIONS.rules(direction) {
        for start in find_phrase(&tokens, &rule.pattern) {
            for alternative in &rule.alternatives {
                let variant = splice(&tokens, start, rule.pattern.len(), alternative);
                if !visited.insert(variant.clone()) {
                    continue;
                }
                if variants.len() >= limit {
                    return false;
                }
                variants.insert(variant.clone());
                if !expand_into(&variant, direction, depth + 1, limit, visited, variants) {
                    return false;
                }
            }
        }
    }
    true
}

/// Start offsets of every whole-token occurrence of `pattern`.
fn find_phrase(tokens: &[&str], pattern: &[String]) -> Vec<usize> {
    if pattern.is_empty() || pattern.len() > tokens.len() {
        return Vec::new();
    }
    (0..=tokens.len() - pattern.len())
        .filter(|&start| {
            tokens[start..start + pattern.len()]
                .iter()
                .zip(pattern)
                .all(|(token, word)| *token == word.as_str())
        })
        .collect()
}

fn splice(tokens: &[&str], start: usize, len: usize, replacement: &str) -> String {
    let mut words: Vec<&str> = Vec::with_capacity(tokens.len() + 2);
    words.extend_from_slice(&tokens[..start]);
    words.push(replacement);
    words.extend_from_slice(&tokens[start + len..]);
    words.join(" ")
}

/// Full round-trip coverage of one utterance: the normalized text plus
/// long→short→long and short→long→short expansions, flattened.
///
/// Each direction may add at most half of [`MAX_VARIANTS`], so a long
/// utterance still gets both its expanded and its contracted forms.
pub fn all_variants(text: &str) -> BTreeSet<String> {
    let key = comparison_key(text);
    let mut variants = BTreeSet::new();
    variants.insert(key.clone());
    let mut truncated = false;

    for direction in [Direction::ToLong, Direction::ToShort] {
        let ceiling = (variants.len() + MAX_VARIANTS / 2).min(MAX_VARIANTS);
        let (firsts, cut) = expand_bounded(&key, direction, ceiling - variants.len());
        truncated |= cut;

        for first in firsts {
            if variants.len() >= ceiling {
                truncated = true;
                break;
            }
            variants.insert(first.clone());

            let room = ceiling.saturating_sub(variants.len());
            if room == 0 {
                continue;
            }
            let (back, cut) = expand_bounded(&first, direction.opposite(), room);
            truncated |= cut;
            for variant in back {
                if variants.len() >= ceiling {
                    truncated = true;
                    break;
                }
                variants.insert(variant);
            }
        }
    }

    if truncated {
        tracing::warn!(key = %key, limit = MAX_VARIANTS, "Variant expansion truncated");
    }
    variants
}

/// Memoizing front for [`all_variants`]; intent matching asks for the same
/// phrases over and over.
pub struct VariantGenerator {
    cache: Mutex<lru::LruCache<String, BTreeSet<String>>>,
}

impl VariantGenerator {
    pub fn new(cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(lru::LruCache::new(capacity)),
        }
    }

    /// Cached variants of `text`, without computing anything on a miss.
    pub fn cached(&self, text: &str) -> Option<BTreeSet<String>> {
        self.cache.lock().get(&comparison_key(text)).cloned()
    }

    pub fn variants(&self, text: &str) -> BTreeSet<String> {
        let key = comparison_key(text);
        if let Some(cached) = self.cache.lock().get(&key) {
            return cached.clone();
        }

        let variants = all_variants(&key);
        tracing::trace!(key = %key, count = variants.len(), "Generated lexical variants");
        self.cache.lock().put(key, variants.clone());
        variants
    }
}

impl Default for VariantGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{comparison_key, normalize};

    #[test]
    fn test_to_short_basic() {
        let variants = expand("I do not know", Direction::ToShort);
        assert!(variants.contains("i don't know"));
    }

    #[test]
    fn test_to_long_ambiguous_branches() {
        let variants = expand("Who's there?", Direction::ToLong);
        assert!(variants.contains("who is there"));
        assert!(variants.contains("who has there"));
    }

    #[test]
    fn test_no_rule_returns_normalized_input() {
        let variants = expand("  Hello,  World ", Direction::ToLong);
        assert_eq!(variants.len(), 1);
        assert!(variants.contains("hello world"));
    }

    #[test]
    fn test_whole_word_matching_only() {
        // "undo not" must not trigger the "do not" rule
        let variants = expand("undo not", Direction::ToShort);
        assert_eq!(variants.into_iter().collect::<Vec<_>>(), vec!["undo not".to_string()]);
    }

    #[test]
    fn test_multiple_contractions_fully_rewritten() {
        let variants = expand("I don't know who's there", Direction::ToLong);
        assert!(variants.contains("i do not know who is there"));
        assert!(variants.contains("i do not know who has there"));
        // partially rewritten forms are kept too
        assert!(variants.contains("i do not know who's there"));
    }

    #[test]
    fn test_compounding_contraction() {
        let long = expand("She'd've come", Direction::ToLong);
        assert!(long.contains("she would have come"));

        let short = expand("she would have come", Direction::ToShort);
        assert!(short.contains("she'd've come"));
        assert!(short.contains("she'd have come"));
        assert!(short.contains("she would've come"));
    }

    #[test]
    fn test_round_trip_contains_normalized_input() {
        let phrases = [
            "I do not know",
            "Who has the keys?",
            "They would have said so",
            "It is what it is",
            "We cannot stay",
            "You are late, and I am early",
        ];
        for phrase in phrases {
            let normalized = normalize(phrase, true, true);
            let mut round_trip = BTreeSet::new();
            for short in expand(phrase, Direction::ToShort) {
                round_trip.extend(expand(&short, Direction::ToLong));
            }
            assert!(
                round_trip.contains(&normalized),
                "round trip of '{}' lost '{}': {:?}",
                phrase,
                normalized,
                round_trip
            );
        }
    }

    #[test]
    fn test_all_variants_covers_both_directions() {
        let variants = all_variants("What's the price?");
        assert!(variants.contains("what's the price"));
        assert!(variants.contains("what is the price"));
        assert!(variants.contains("what has the price"));
    }

    #[test]
    fn test_generator_caches_by_key() {
        let generator = VariantGenerator::new(4);
        assert!(generator.cached("I'm here").is_none());
        let first = generator.variants("I'm here");
        let second = generator.variants("  i'M   HERE ");
        assert_eq!(first, second);
        assert!(first.contains("i am here"));
        assert_eq!(generator.cached("i'm here"), Some(first));
    }

    #[test]
    fn test_stacked_contractions_stay_bounded() {
        let text = vec!["it's"; 12].join(" ");
        let started = std::time::Instant::now();

        let variants = all_variants(&text);

        assert!(variants.len() <= MAX_VARIANTS);
        assert!(variants.contains(&text));
        assert!(variants.iter().any(|v| v.starts_with("it is") || v.starts_with("it has")));
        assert!(expand(&text, Direction::ToLong).len() <= MAX_VARIANTS);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn test_chatty_sentence_keeps_both_directions() {
        let text = "I'm sure it's fine, that's what she's said and they're here, \
                    we're there, who's next, what's up";

        let variants = all_variants(text);

        assert!(variants.len() <= MAX_VARIANTS);
        assert!(variants.contains(&comparison_key(text)));
        assert!(variants.iter().any(|v| v.starts_with("i am sure")));
    }
}
