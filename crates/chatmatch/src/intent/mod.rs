//! Stored question/answer intents and variant-aware matching.

pub mod matcher;
pub mod store;

pub use matcher::{IntentMatch, IntentMatcher};
pub use store::{InMemoryIntentStore, IntentStore};
