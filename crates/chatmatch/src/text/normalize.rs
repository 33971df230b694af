use std::sync::LazyLock;

use regex::Regex;

// Compiled once, reused on every call.
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));
static APOSTROPHE_SPACING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*'\s*").expect("apostrophe regex is valid"));
static PUNCTUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("punctuation regex is valid"));
static PUNCTUATION_KEEP_APOSTROPHE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s']").expect("punctuation regex is valid"));

/// Canonicalize text for comparison.
///
/// Collapses whitespace, trims, glues apostrophes to their neighbours
/// ("don ' t" becomes "don't"), optionally strips punctuation (optionally
/// keeping apostrophes) and lowercases.
pub fn normalize(text: &str, remove_punctuation: bool, keep_apostrophes: bool) -> String {
    let text = text.replace(['\u{2019}', '\u{2018}'], "'");
    let collapsed = WHITESPACE_RE.replace_all(&text, " ");
    let glued = APOSTROPHE_SPACING_RE.replace_all(collapsed.trim(), "'");

    let stripped = if remove_punctuation {
        let re = if keep_apostrophes {
            &*PUNCTUATION_KEEP_APOSTROPHE_RE
        } else {
            &*PUNCTUATION_RE
        };
        let without = re.replace_all(&glued, "");
        // Stripping "a - b" leaves a double space behind.
        WHITESPACE_RE.replace_all(without.trim(), " ").into_owned()
    } else {
        glued.into_owned()
    };

    stripped.to_lowercase()
}

/// The key stored on intent examples and used for every lookup.
pub fn comparison_key(text: &str) -> String {
    normalize(text, true, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_and_case() {
        assert_eq!(normalize("  Hello,   World! ", true, false), "hello world");
        assert_eq!(normalize("Tabs\tand\nnewlines", false, false), "tabs and newlines");
    }

    #[test]
    fn test_apostrophe_spacing() {
        assert_eq!(normalize("I don ' t know", true, true), "i don't know");
        assert_eq!(normalize("We 're here", false, true), "we're here");
    }

    #[test]
    fn test_typographic_apostrophe() {
        assert_eq!(comparison_key("Don\u{2019}t stop"), "don't stop");
    }

    #[test]
    fn test_apostrophes_dropped_when_not_kept() {
        assert_eq!(normalize("Don't", true, false), "dont");
    }

    #[test]
    fn test_stripping_leaves_single_spaces() {
        assert_eq!(comparison_key("Price - per unit?"), "price per unit");
    }

    #[test]
    fn test_punctuation_kept_when_requested() {
        assert_eq!(normalize("Keep, Punctuation.", false, false), "keep, punctuation.");
    }

    #[test]
    fn test_deterministic() {
        let input = "What's   the PRICE?!";
        assert_eq!(comparison_key(input), comparison_key(input));
        assert_eq!(comparison_key(input), "what's the price");
    }
}
