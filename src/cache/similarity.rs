//! Near-Duplicate Lookup
//!
//! Keeps a bounded window of recently written keys per content type and
//! scores queries against them by token overlap (Jaccard ratio), so two
//! phrasings of the same question can share one cached AI answer.

use std::collections::{BTreeSet, HashMap, VecDeque};

use parking_lot::Mutex;

use super::entry::ContentType;

/// Normalize text into a set of lowercase alphanumeric tokens
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Token-overlap ratio `|A ∩ B| / |A ∪ B|` in `[0, 1]`
///
/// Two empty token sets score 0 (nothing to match on).
pub fn similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Best candidate for a query
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarMatch {
    /// Cache key of the candidate
    pub key: String,
    /// Similarity score in `[0, 1]`
    pub score: f64,
}

struct Indexed {
    key: String,
    tokens: BTreeSet<String>,
}

/// Recently written keys per content type
pub struct SimilarityIndex {
    window: usize,
    recent: Mutex<HashMap<ContentType, VecDeque<Indexed>>>,
}

impl SimilarityIndex {
    /// Create an index remembering up to `window` keys per content type
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Record a key as recently written
    pub fn record(&self, content_type: ContentType, key: &str) {
        let mut recent = self.recent.lock();
        let queue = recent.entry(content_type).or_default();
        queue.retain(|i| i.key != key);
        queue.push_back(Indexed {
            key: key.to_string(),
            tokens: tokenize(key),
        });
        while queue.len() > self.window {
            queue.pop_front();
        }
    }

    /// Forget a key
    pub fn forget(&self, content_type: Option<ContentType>, key: &str) {
        let mut recent = self.recent.lock();
        match content_type {
            Some(ct) => {
                if let Some(queue) = recent.get_mut(&ct) {
                    queue.retain(|i| i.key != key);
                }
            }
            None => {
                for queue in recent.values_mut() {
                    queue.retain(|i| i.key != key);
                }
            }
        }
    }

    /// Forget every key starting with `prefix`
    pub fn forget_prefix(&self, content_type: Option<ContentType>, prefix: &str) {
        let mut recent = self.recent.lock();
        for (ct, queue) in recent.iter_mut() {
            if content_type.map_or(true, |want| want == *ct) {
                queue.retain(|i| !i.key.starts_with(prefix));
            }
        }
    }

    /// Best match at or above `threshold`, excluding an exact key match
    pub fn best_match(
        &self,
        content_type: ContentType,
        query: &str,
        threshold: f64,
    ) -> Option<SimilarMatch> {
        let query_tokens = tokenize(query);
        let recent = self.recent.lock();
        let queue = recent.get(&content_type)?;

        queue
            .iter()
            .filter(|i| i.key != query)
            .map(|i| SimilarMatch {
                key: i.key.clone(),
                score: similarity(&query_tokens, &i.tokens),
            })
            .filter(|m| m.score >= threshold)
            // Later entries win ties: fresher answers first
            .fold(None, |best: Option<SimilarMatch>, m| match best {
                Some(b) if b.score > m.score => Some(b),
                _ => Some(m),
            })
    }

    /// Number of keys tracked for a content type
    pub fn len(&self, content_type: ContentType) -> usize {
        self.recent
            .lock()
            .get(&content_type)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tokenize_normalizes() {
        let tokens = tokenize("game:Elden Ring:help  -- HOW to PARRY?");
        let expected: BTreeSet<String> = ["game", "elden", "ring", "help", "how", "to", "parry"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_similarity_scores() {
        let a = tokenize("how to beat malenia");
        let b = tokenize("How to beat Malenia?");
        let c = tokenize("best armor for mages");

        assert_eq!(similarity(&a, &b), 1.0);
        assert_eq!(similarity(&a, &c), 0.0);
        assert_eq!(similarity(&tokenize(""), &tokenize("")), 0.0);

        let d = tokenize("how to beat malenia fast");
        assert!((similarity(&a, &d) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_best_match_respects_threshold() {
        let index = SimilarityIndex::new(16);
        index.record(ContentType::GameHelp, "elden ring how to beat malenia");
        index.record(ContentType::GameHelp, "elden ring best mage build");

        let hit = index
            .best_match(ContentType::GameHelp, "Elden Ring: how to beat Malenia?", 0.85)
            .unwrap();
        assert_eq!(hit.key, "elden ring how to beat malenia");
        assert_eq!(hit.score, 1.0);

        assert!(index
            .best_match(ContentType::GameHelp, "elden ring parry timing", 0.85)
            .is_none());
        // Different content type is never consulted
        assert!(index
            .best_match(ContentType::AiResponse, "elden ring how to beat malenia", 0.1)
            .is_none());
    }

    #[test]
    fn test_window_is_bounded() {
        let index = SimilarityIndex::new(2);
        index.record(ContentType::AiResponse, "a");
        index.record(ContentType::AiResponse, "b");
        index.record(ContentType::AiResponse, "c");
        assert_eq!(index.len(ContentType::AiResponse), 2);

        // Re-recording moves a key to the back instead of duplicating it
        index.record(ContentType::AiResponse, "b");
        assert_eq!(index.len(ContentType::AiResponse), 2);
    }

    #[test]
    fn test_forget() {
        let index = SimilarityIndex::new(8);
        index.record(ContentType::GameHelp, "game:a:help");
        index.record(ContentType::GameHelp, "game:b:help");
        index.record(ContentType::AiResponse, "game:c");

        index.forget(Some(ContentType::GameHelp), "game:a:help");
        assert_eq!(index.len(ContentType::GameHelp), 1);

        index.forget_prefix(None, "game:");
        assert_eq!(index.len(ContentType::GameHelp), 0);
        assert_eq!(index.len(ContentType::AiResponse), 0);
    }

    proptest! {
        #[test]
        fn prop_similarity_is_bounded_and_symmetric(a in "[a-z ]{0,40}", b in "[a-z ]{0,40}") {
            let ta = tokenize(&a);
            let tb = tokenize(&b);
            let s = similarity(&ta, &tb);
            prop_assert!((0.0..=1.0).contains(&s));
            prop_assert_eq!(s, similarity(&tb, &ta));
        }

        #[test]
        fn prop_identical_nonempty_text_scores_one(a in "[a-z]{1,10}( [a-z]{1,10}){0,5}") {
            let t = tokenize(&a);
            prop_assert_eq!(similarity(&t, &t), 1.0);
        }
    }
}
