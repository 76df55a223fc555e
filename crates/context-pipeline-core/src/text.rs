//! Shared text normalization.
//!
//! [`remove_stopwords`] is the single preprocessing step applied before any
//! text reaches an embedding model, both for chunks at index time and for
//! queries at retrieval time. Index-time and query-time vectors are only
//! comparable if both sides go through this exact function.
//!
//! Tokens are whitespace-separated and matched case-sensitively against a
//! lowercase English stop-word list, so `"The"` survives while `"the"` is
//! dropped. The list is the classic 174-word English set, which also covers
//! modals such as `would`, `could` and `ought`.

use std::collections::HashSet;
use std::sync::LazyLock;

const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "aren't", "as", "at", "be", "because", "been", "before", "being", "below", "between",
    "both", "but", "by", "can't", "cannot", "could", "couldn't", "did", "didn't", "do", "does",
    "doesn't", "doing", "don't", "down", "during", "each", "few", "for", "from", "further",
    "had", "hadn't", "has", "hasn't", "have", "haven't", "having", "he", "he'd", "he'll",
    "he's", "her", "here", "here's", "hers", "herself", "him", "himself", "his", "how", "how's",
    "i", "i'd", "i'll", "i'm", "i've", "if", "in", "into", "is", "isn't", "it", "it's", "its",
    "itself", "let's", "me", "more", "most", "mustn't", "my", "myself", "no", "nor", "not",
    "of", "off", "on", "once", "only", "or", "other", "ought", "our", "ours", "ourselves",
    "out", "over", "own", "same", "shan't", "she", "she'd", "she'll", "she's", "should",
    "shouldn't", "so", "some", "such", "than", "that", "that's", "the", "their", "theirs",
    "them", "themselves", "then", "there", "there's", "these", "they", "they'd", "they'll",
    "they're", "they've", "this", "those", "through", "to", "too", "under", "until", "up",
    "very", "was", "wasn't", "we", "we'd", "we'll", "we're", "we've", "were", "weren't", "what",
    "what's", "when", "when's", "where", "where's", "which", "while", "who", "who's", "whom",
    "why", "why's", "with", "won't", "would", "wouldn't", "you", "you'd", "you'll", "you're",
    "you've", "your", "yours", "yourself", "yourselves",
];

static STOPWORDS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| ENGLISH_STOPWORDS.iter().copied().collect());

/// Returns `true` if `token` is in the English stop-word set.
pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// Drop stop-words from `text` and rejoin the remaining tokens with a single
/// space.
///
/// ```rust
/// use context_pipeline_core::text::remove_stopwords;
///
/// assert_eq!(remove_stopwords("how is the index built"), "index built");
/// ```
pub fn remove_stopwords(text: &str) -> String {
    text.split_whitespace()
        .filter(|token| !is_stopword(token))
        .collect::<Vec<_>>()
        .join(" ")
}
