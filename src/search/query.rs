use std::collections::HashSet;
use std::sync::OnceLock;

use crate::text::{is_stopword, raw_spans, tokenize};

/// Words that appear in almost every conversation and deserve the floor
/// weight when they survive tokenization.
const COMMON_WORDS: &[&str] = &[
    "need", "want", "like", "just", "also", "very", "really", "actually", "basically",
    "probably", "maybe", "perhaps", "seems", "looks", "think", "know", "see", "get", "got",
    "make", "made", "take", "took", "come", "came", "say", "said", "tell", "told", "ask",
    "asked", "use", "used", "using", "work", "working", "worked", "thing", "things", "still",
    "even", "back", "now", "then", "here", "there", "writing", "write", "wrote", "written",
    "read", "reading", "message", "messages", "file", "files", "code", "data", "system",
];

/// Question-and-chatter words that carry no retrieval signal on top of the
/// base stopword set.
const QUERY_STOPWORDS: &[&str] = &[
    "discuss", "discussed", "discussing", "decide", "decided", "talk", "talked", "mention",
    "mentioned", "conversation", "conversations", "happened",
];

fn common_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| COMMON_WORDS.iter().copied().collect())
}

fn query_stopwords() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| QUERY_STOPWORDS.iter().copied().collect())
}

/// A query term with its scoring weight. Terms above 1.0 are the ones the
/// user unmistakably meant (project names, identifiers), and they anchor
/// the adversarial guard in Tier 3.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedTerm {
    pub term: String,
    pub weight: f64,
}

impl WeightedTerm {
    pub fn is_high_weight(&self) -> bool {
        self.weight > 1.0
    }
}

/// Tokens used for Tier-1 index lookups: the full tokenization of the query
/// minus conversational filler.
pub fn query_tokens(query: &str) -> Vec<String> {
    tokenize(query)
        .into_iter()
        .filter(|t| !query_stopwords().contains(t.as_str()))
        .collect()
}

/// Weight a single word. Rare, specific-looking forms score high; filler
/// scores low.
pub fn word_weight(word: &str) -> f64 {
    let lower = word.to_lowercase();

    if common_words().contains(lower.as_str()) {
        return 0.3;
    }
    if lower.len() <= 3 {
        return 0.5;
    }
    // Identifier-looking: digits, underscores, hyphens
    if word.chars().any(|c| c.is_ascii_digit() || c == '_' || c == '-') {
        return 2.0;
    }
    // CamelCase or Capitalized
    let has_inner_camel = word
        .as_bytes()
        .windows(2)
        .any(|w| w[0].is_ascii_lowercase() && w[1].is_ascii_uppercase());
    if has_inner_camel || word.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        return 1.5;
    }
    // Short lowercase words that survived the common filter are usually
    // project or tool names: wlxc, helm, rust
    if (4..=6).contains(&lower.len()) {
        return 1.5;
    }
    1.0
}

/// Weighted keyword extraction: tokenish words (3+ chars, not filler),
/// weighted, the five heaviest kept. Ties keep first-appearance order.
pub fn extract_keywords(query: &str) -> Vec<WeightedTerm> {
    let mut seen = HashSet::new();
    let mut weighted = Vec::new();

    for word in raw_spans(query) {
        let lower = word.to_lowercase();
        if lower.len() < 3 || is_stopword(&lower) || query_stopwords().contains(lower.as_str()) {
            continue;
        }
        if !seen.insert(lower.clone()) {
            continue;
        }
        weighted.push(WeightedTerm {
            weight: word_weight(word),
            term: lower,
        });
    }

    // Stable: equal weights stay in query order
    weighted.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
    weighted.truncate(5);
    weighted
}
