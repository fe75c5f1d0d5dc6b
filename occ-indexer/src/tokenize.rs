//! Deterministic term extraction shared by [`crate::InvertedIndex`] add/search paths.

use hashbrown::HashSet;
use regex::Regex;
use std::sync::LazyLock;

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("valid regex"));

/// Lowercases `text` and extracts runs of `\w` (letters/digits/underscore),
/// minimum length 1. Stop-word filtering is intentionally not performed here;
/// callers that want it filter the returned set themselves.
pub fn tokenize_terms(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    WORD_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_lowercase_word_runs() {
        let terms = tokenize_terms("Database Setup_Guide, v2!");
        assert!(terms.contains("database"));
        assert!(terms.contains("setup_guide"));
        assert!(terms.contains("v2"));
        assert!(!terms.contains(","));
    }

    #[test]
    fn empty_text_yields_empty_set() {
        assert!(tokenize_terms("").is_empty());
        assert!(tokenize_terms("   ...   ").is_empty());
    }
}
