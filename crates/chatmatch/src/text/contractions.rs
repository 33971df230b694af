//! Static bidirectional table of English contractions.
//!
//! The long → short direction is a plain map. The short → long direction
//! groups every long form sharing a short form, so ambiguous contractions
//! carry explicit alternatives (`who's` → `who is` | `who has`).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::variants::Direction;

/// `(long form, short form)`, lowercase, apostrophes as `'`.
const CONTRACTION_PAIRS: &[(&str, &str)] = &[
    ("are not", "aren't"),
    ("can not", "can't"),
    ("cannot", "can't"),
    ("could not", "couldn't"),
    ("could have", "could've"),
    ("did not", "didn't"),
    ("does not", "doesn't"),
    ("do not", "don't"),
    ("had not", "hadn't"),
    ("has not", "hasn't"),
    ("have not", "haven't"),
    ("he is", "he's"),
    ("he has", "he's"),
    ("he would", "he'd"),
    ("he had", "he'd"),
    ("he will", "he'll"),
    ("how is", "how's"),
    ("how did", "how'd"),
    ("how will", "how'll"),
    ("i am", "i'm"),
    ("i would", "i'd"),
    ("i had", "i'd"),
    ("i will", "i'll"),
    ("i have", "i've"),
    ("is not", "isn't"),
    ("it is", "it's"),
    ("it has", "it's"),
    ("it will", "it'll"),
    ("let us", "let's"),
    ("might have", "might've"),
    ("must have", "must've"),
    ("must not", "mustn't"),
    ("she is", "she's"),
    ("she has", "she's"),
    ("she would", "she'd"),
    ("she had", "she'd"),
    ("she will", "she'll"),
    ("should have", "should've"),
    ("should not", "shouldn't"),
    ("that is", "that's"),
    ("that has", "that's"),
    ("there is", "there's"),
    ("there has", "there's"),
    ("they are", "they're"),
    ("they would", "they'd"),
    ("they had", "they'd"),
    ("they will", "they'll"),
    ("they have", "they've"),
    ("was not", "wasn't"),
    ("we are", "we're"),
    ("we would", "we'd"),
    ("we had", "we'd"),
    ("we will", "we'll"),
    ("we have", "we've"),
    ("were not", "weren't"),
    ("what is", "what's"),
    ("what has", "what's"),
    ("what are", "what're"),
    ("what will", "what'll"),
    ("where is", "where's"),
    ("where did", "where'd"),
    ("who is", "who's"),
    ("who has", "who's"),
    ("who will", "who'll"),
    ("who would", "who'd"),
    ("who had", "who'd"),
    ("why is", "why's"),
    ("will not", "won't"),
    ("would have", "would've"),
    ("would not", "wouldn't"),
    ("you are", "you're"),
    ("you would", "you'd"),
    ("you had", "you'd"),
    ("you will", "you'll"),
    ("you have", "you've"),
    // compounding forms
    ("i would have", "i'd've"),
    ("he would have", "he'd've"),
    ("she would have", "she'd've"),
    ("we would have", "we'd've"),
    ("they would have", "they'd've"),
    ("you would have", "you'd've"),
    ("could not have", "couldn't've"),
    ("should not have", "shouldn't've"),
    ("would not have", "wouldn't've"),
];

/// A phrase to look for (as whole tokens) and what it may be rewritten to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractionRule {
    pub pattern: Vec<String>,
    pub alternatives: Vec<String>,
}

impl ContractionRule {
    pub fn is_ambiguous(&self) -> bool {
        self.alternatives.len() > 1
    }
}

#[derive(Debug)]
pub struct ContractionTable {
    to_short: Vec<ContractionRule>,
    to_long: Vec<ContractionRule>,
}

pub static CONTRACTIONS: LazyLock<ContractionTable> =
    LazyLock::new(|| ContractionTable::from_pairs(CONTRACTION_PAIRS));

impl ContractionTable {
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut short_by_long: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        let mut long_by_short: BTreeMap<&str, Vec<String>> = BTreeMap::new();

        for &(long, short) in pairs {
            push_unique(short_by_long.entry(long).or_default(), short);
            push_unique(long_by_short.entry(short).or_default(), long);
        }

        Self {
            to_short: into_rules(short_by_long),
            to_long: into_rules(long_by_short),
        }
    }

    pub fn rules(&self, direction: Direction) -> &[ContractionRule] {
        match direction {
            Direction::ToShort => &self.to_short,
            Direction::ToLong => &self.to_long,
        }
    }

    /// Look up the replacements for a phrase in the given direction.
    pub fn alternatives(&self, phrase: &str, direction: Direction) -> Option<&[String]> {
        self.rules(direction)
            .iter()
            .find(|rule| rule.pattern.join(" ") == phrase)
            .map(|rule| rule.alternatives.as_slice())
    }
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

fn into_rules(map: BTreeMap<&str, Vec<String>>) -> Vec<ContractionRule> {
    map.into_iter()
        .map(|(phrase, alternatives)| ContractionRule {
            pattern: phrase.split_whitespace().map(str::to_string).collect(),
            alternatives,
        })
        .collect()
}
