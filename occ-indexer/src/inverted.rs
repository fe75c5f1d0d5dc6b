//! Term -> segment-id postings, scoped to a single project by construction
//! (the owning `SegmentStore` keeps one [`InvertedIndex`] per project).

use hashbrown::{HashMap, HashSet};

use crate::tokenize::tokenize_terms;

/// Maintains `term -> set<segment_id>` and `segment_id -> set<term>` so that
/// `remove` doesn't need to re-tokenize the original text.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    postings: HashMap<String, HashSet<String>>,
    segment_words: HashMap<String, HashSet<String>>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `text` under `id`. Idempotent: calling this twice with the
    /// same `(id, text)` leaves the index unchanged after the first call.
    pub fn add(&mut self, id: &str, text: &str) {
        let terms = tokenize_terms(text);
        for term in &terms {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(id.to_string());
        }
        self.segment_words.insert(id.to_string(), terms);
    }

    /// Removes `id` from every posting it appears in. No-op if `id` is unknown.
    pub fn remove(&mut self, id: &str) {
        let Some(terms) = self.segment_words.remove(id) else {
            return;
        };
        for term in terms {
            if let Some(posting) = self.postings.get_mut(&term) {
                posting.remove(id);
                if posting.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
    }

    /// Tokenizes `query` and intersects postings, smallest posting first so
    /// the rarest term dominates the work. Empty query returns an empty set.
    pub fn search(&self, query: &str) -> HashSet<String> {
        let query_terms = tokenize_terms(query);
        if query_terms.is_empty() {
            return HashSet::new();
        }

        let mut postings: Vec<&HashSet<String>> = Vec::with_capacity(query_terms.len());
        for term in &query_terms {
            match self.postings.get(term) {
                Some(posting) => postings.push(posting),
                None => return HashSet::new(),
            }
        }
        postings.sort_by_key(|p| p.len());

        let mut iter = postings.into_iter();
        let Some(first) = iter.next() else {
            return HashSet::new();
        };
        let mut result = first.clone();
        for posting in iter {
            result.retain(|id| posting.contains(id));
            if result.is_empty() {
                break;
            }
        }
        result
    }

    pub fn contains(&self, id: &str) -> bool {
        self.segment_words.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.segment_words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segment_words.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_search_finds_segment() {
        let mut index = InvertedIndex::new();
        index.add("s1", "database setup guide");
        let hits = index.search("guide");
        assert!(hits.contains("s1"));
    }

    #[test]
    fn remove_drops_empty_postings() {
        let mut index = InvertedIndex::new();
        index.add("s1", "database setup guide");
        index.remove("s1");
        assert!(index.search("guide").is_empty());
        assert!(!index.contains("s1"));
    }

    #[test]
    fn remove_unknown_id_is_noop() {
        let mut index = InvertedIndex::new();
        index.remove("missing");
        assert!(index.is_empty());
    }

    #[test]
    fn add_is_idempotent() {
        let mut index = InvertedIndex::new();
        index.add("s1", "alpha beta");
        index.add("s1", "alpha beta");
        assert_eq!(index.search("alpha").len(), 1);
        assert_eq!(index.search("beta").len(), 1);
    }

    #[test]
    fn multi_term_query_intersects_postings() {
        let mut index = InvertedIndex::new();
        index.add("s1", "alpha beta");
        index.add("s2", "alpha gamma");
        let hits = index.search("alpha beta");
        assert_eq!(hits.len(), 1);
        assert!(hits.contains("s1"));
    }

    #[test]
    fn query_with_unknown_term_returns_empty() {
        let mut index = InvertedIndex::new();
        index.add("s1", "alpha beta");
        assert!(index.search("alpha nonexistent").is_empty());
    }

    #[test]
    fn empty_query_returns_empty_set() {
        let mut index = InvertedIndex::new();
        index.add("s1", "alpha beta");
        assert!(index.search("").is_empty());
        assert!(index.search("   ").is_empty());
    }
}
