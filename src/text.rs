use std::collections::HashSet;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Stopwords
// ---------------------------------------------------------------------------

/// English stopwords plus transcript-metadata noise. Shared by index-time and
/// query-time tokenization; the two sides must never diverge or recall breaks.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "can", "need", "dare", "ought", "used", "to", "of", "in", "for", "on", "with", "at", "by",
    "from", "as", "into", "through", "during", "before", "after", "above", "below", "between",
    "under", "again", "further", "then", "once", "here", "there", "when", "where", "why", "how",
    "all", "each", "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only",
    "own", "same", "so", "than", "too", "very", "just", "and", "but", "if", "or", "because",
    "until", "while", "although", "though", "this", "that", "these", "those", "what", "which",
    "who", "whom", "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "your",
    "yours", "yourself", "yourselves", "he", "him", "his", "himself", "she", "her", "hers",
    "herself", "it", "its", "itself", "they", "them", "their", "theirs", "themselves", "am",
    "about", "also", "any", "both", "down", "get", "got", "like", "make", "made", "now", "one",
    "out", "over", "see", "up", "use", "using", "want", "well", "work", "yeah", "yes", "ok",
    "okay", "sure", "thanks", "thank", "please", "let", "know", "think", "going", "way",
    "things", "thing", "something", "anything", "everything", "nothing", "time", "really",
    "actually", "basically", "probably", "maybe", "right", "good", "great", "nice", "looks",
    "look", "looking", "still", "back", "first", "last", "next", "new", "old", "done", "try",
    "tried",
    // Transcript-metadata noise (not meaningful topics)
    "session", "sessions", "timestamp", "system", "content", "user", "assistant", "tool",
    "error", "warning", "info", "debug", "true", "false", "null", "pst", "utc", "gmt",
    "localhost", "http", "https",
];

fn stopword_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOPWORDS.iter().copied().collect())
}

pub fn is_stopword(word: &str) -> bool {
    stopword_set().contains(word)
}

// ---------------------------------------------------------------------------
// Span extraction
// ---------------------------------------------------------------------------

/// Extract maximal raw spans matching `[A-Za-z][A-Za-z0-9_-]*`. Anything
/// outside that alphabet (including non-ASCII runs) is skipped.
pub fn raw_spans(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_alphabetic() {
            let start = i;
            i += 1;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-' || bytes[i] == b'_')
            {
                i += 1;
            }
            spans.push(&text[start..i]);
        } else {
            i += 1;
        }
    }
    spans
}

// ---------------------------------------------------------------------------
// Compound splitting
// ---------------------------------------------------------------------------

/// Split a word into its compound parts, preserving original case.
///
/// Splits on `-`/`_` first, then at lowercase→uppercase boundaries and at
/// acronym→word boundaries (`ABCDef` → `ABC` + `Def`). Topic extraction needs
/// the original-case parts, so no lowercasing happens here.
pub fn split_compound(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for piece in word.split(['-', '_']) {
        if piece.is_empty() {
            continue;
        }
        split_case_boundaries(piece, &mut parts);
    }
    parts
}

fn split_case_boundaries(piece: &str, out: &mut Vec<String>) {
    let chars: Vec<char> = piece.chars().collect();
    let mut start = 0;
    for i in 1..chars.len() {
        let prev = chars[i - 1];
        let cur = chars[i];
        let next_lower = chars.get(i + 1).is_some_and(|c| c.is_ascii_lowercase());
        let boundary = (prev.is_ascii_lowercase() && cur.is_ascii_uppercase())
            || (prev.is_ascii_uppercase() && cur.is_ascii_uppercase() && next_lower);
        if boundary {
            out.push(chars[start..i].iter().collect());
            start = i;
        }
    }
    if start < chars.len() {
        out.push(chars[start..].iter().collect());
    }
}

// ---------------------------------------------------------------------------
// Tokenization
// ---------------------------------------------------------------------------

/// Map a text blob to its searchable tokens, unique, in first-seen order.
///
/// Each raw span contributes its whole lowercased form (so `ChessRT` is
/// findable as `chessrt` and `glicko-2` as a compound) plus every compound
/// part. Parts shorter than 3 chars and stopwords are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    let mut push = |token: String, seen: &mut HashSet<String>, out: &mut Vec<String>| {
        if token.len() >= 3 && !is_stopword(&token) && seen.insert(token.clone()) {
            out.push(token);
        }
    };

    for span in raw_spans(text) {
        push(span.to_lowercase(), &mut seen, &mut out);
        for part in split_compound(span) {
            push(part.to_lowercase(), &mut seen, &mut out);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_spans() {
        let spans = raw_spans("Glicko-2 rating, 42 units of wlxc_runtime!");
        assert_eq!(spans, vec!["Glicko-2", "rating", "units", "of", "wlxc_runtime"]);
    }

    #[test]
    fn test_split_compound_kebab_and_snake() {
        assert_eq!(split_compound("context-memory"), vec!["context", "memory"]);
        assert_eq!(split_compound("from_sq"), vec!["from", "sq"]);
        assert_eq!(split_compound("Glicko-2"), vec!["Glicko", "2"]);
    }

    #[test]
    fn test_split_compound_camel_case() {
        assert_eq!(split_compound("validateMove"), vec!["validate", "Move"]);
        assert_eq!(
            split_compound("ReadMessageItem"),
            vec!["Read", "Message", "Item"]
        );
    }

    #[test]
    fn test_split_compound_acronym_boundary() {
        // Acronym followed by a word: the acronym stays whole
        assert_eq!(split_compound("ABCDef"), vec!["ABC", "Def"]);
        assert_eq!(split_compound("PostgreSQL"), vec!["Postgre", "SQL"]);
        // Trailing acronym has no following lowercase, so no split
        assert_eq!(split_compound("ChessRT"), vec!["Chess", "RT"]);
    }

    #[test]
    fn test_tokenize_emits_whole_and_parts() {
        let tokens = tokenize("Glicko-2 rating system for ChessRT leaderboard");
        assert!(tokens.contains(&"glicko-2".to_string()));
        assert!(tokens.contains(&"glicko".to_string()));
        assert!(tokens.contains(&"rating".to_string()));
        assert!(tokens.contains(&"chessrt".to_string()));
        assert!(tokens.contains(&"leaderboard".to_string()));
        // "2" is below the length floor, "for" is a stopword
        assert!(!tokens.contains(&"2".to_string()));
        assert!(!tokens.contains(&"for".to_string()));
    }

    #[test]
    fn test_tokenize_dedupes_in_order() {
        let tokens = tokenize("cache cache Cache caching");
        assert_eq!(tokens, vec!["cache", "caching"]);
    }

    #[test]
    fn test_tokenize_skips_short_and_stopwords() {
        let tokens = tokenize("is it a db or an api we need");
        // "db" is under the length floor; everything else but "api" is a stopword
        assert_eq!(tokens, vec!["api"]);
    }

    #[test]
    fn test_tokenize_non_ascii_runs_skipped() {
        let tokens = tokenize("naïve café résumé runtime");
        // Spans stop at non-ASCII bytes; the plain word survives
        assert!(tokens.contains(&"runtime".to_string()));
    }

    #[test]
    fn test_index_query_parity() {
        // The same function serves both sides, but guard the property anyway
        let text = "Discussed containerd runtime for wlxc";
        assert_eq!(tokenize(text), tokenize(text));
    }
}
