use std::collections::HashMap;
use std::collections::HashSet;

use crate::text::{split_compound, tokenize};

// ---------------------------------------------------------------------------
// Concept table
// ---------------------------------------------------------------------------

/// Hand-curated related-term table: canonical term → up to five related
/// terms. Expansion is recall-only; callers that need precision disable it.
const CONCEPTS: &[(&str, &[&str])] = &[
    ("auth", &["oauth", "login", "authentication", "jwt", "token"]),
    ("db", &["database", "postgres", "sqlite", "sql", "schema"]),
    ("wlxc", &["windows", "container", "isolation", "interop", "policy"]),
    ("rating", &["glicko", "elo", "leaderboard", "rank", "score"]),
    ("container", &["docker", "containerd", "image", "runtime", "pod"]),
    ("search", &["query", "index", "retrieval", "lookup", "ranking"]),
    ("memory", &["cache", "context", "recall", "state", "storage"]),
    ("deploy", &["deployment", "release", "rollout", "ship", "pipeline"]),
    ("testing", &["tests", "spec", "assert", "coverage", "fixture"]),
    ("config", &["configuration", "settings", "toml", "options", "env"]),
    ("api", &["endpoint", "rest", "request", "route", "handler"]),
    ("bug", &["fix", "issue", "defect", "regression", "crash"]),
    ("git", &["commit", "branch", "merge", "rebase", "github"]),
    ("chess", &["chessrt", "game", "move", "board", "checkmate"]),
    ("security", &["tls", "ssl", "certificate", "encryption", "vulnerability"]),
    ("chat", &["discord", "telegram", "channel", "bot", "webhook"]),
    ("logging", &["logs", "tracing", "audit", "stderr", "verbose"]),
    ("performance", &["latency", "throughput", "benchmark", "optimization", "profiling"]),
    ("kubernetes", &["k8s", "cluster", "helm", "kubectl", "pod"]),
    ("frontend", &["react", "component", "typescript", "css", "browser"]),
];

/// Owned view over the embedded concept data. Constructed once per engine so
/// tests can also build shrunken tables.
#[derive(Debug, Clone)]
pub struct ConceptTable {
    related: HashMap<String, Vec<String>>,
}

impl ConceptTable {
    pub fn embedded() -> Self {
        let related = CONCEPTS
            .iter()
            .map(|(term, rel)| {
                (
                    (*term).to_string(),
                    rel.iter().map(|r| (*r).to_string()).collect(),
                )
            })
            .collect();
        Self { related }
    }

    pub fn empty() -> Self {
        Self {
            related: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn with_entry(term: &str, related: &[&str]) -> Self {
        let mut table = Self::empty();
        table.related.insert(
            term.to_string(),
            related.iter().map(|r| (*r).to_string()).collect(),
        );
        table
    }

    pub fn related(&self, term: &str) -> &[String] {
        self.related.get(term).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Match options and traces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    pub substring: bool,
    pub compound: bool,
    pub fuzzy: bool,
    pub concepts: bool,
}

impl MatchOptions {
    /// Everything on. The recall-oriented default for ranking.
    pub fn full() -> Self {
        Self {
            substring: true,
            compound: true,
            fuzzy: true,
            concepts: true,
        }
    }

    /// Direct evidence only — concept expansion off. Used for the
    /// high-weight-term guard so a related-term chain can never stand in
    /// for the term the user actually typed.
    pub fn direct() -> Self {
        Self {
            concepts: false,
            ..Self::full()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    Exact,
    Substring,
    Compound,
    Fuzzy,
    Concept,
}

impl MatchRule {
    pub fn label(&self) -> &'static str {
        match self {
            MatchRule::Exact => "exact",
            MatchRule::Substring => "substring",
            MatchRule::Compound => "compound",
            MatchRule::Fuzzy => "fuzzy",
            MatchRule::Concept => "concept",
        }
    }
}

/// How a query term matched, and against which content token.
#[derive(Debug, Clone)]
pub struct MatchTrace {
    pub rule: MatchRule,
    pub term: String,
}

impl MatchTrace {
    pub fn describe(&self) -> String {
        format!("{}:{}", self.rule.label(), self.term)
    }
}

// ---------------------------------------------------------------------------
// Content token cache
// ---------------------------------------------------------------------------

/// Tokenized message text, computed once and probed for every query term.
#[derive(Debug)]
pub struct ContentTokens {
    tokens: Vec<String>,
    set: HashSet<String>,
}

impl ContentTokens {
    pub fn new(text: &str) -> Self {
        let tokens = tokenize(text);
        let set = tokens.iter().cloned().collect();
        Self { tokens, set }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn contains(&self, token: &str) -> bool {
        self.set.contains(token)
    }
}

// ---------------------------------------------------------------------------
// Enhanced matching
// ---------------------------------------------------------------------------

/// Try to match one query term against tokenized content.
///
/// Rules are tried in order: exact token membership, strict-direction
/// substring, compound-part equality, guarded Levenshtein fuzzy, then
/// concept expansion (if enabled). Returns the first trace that fires.
pub fn enhanced_match(
    query_term: &str,
    content: &ContentTokens,
    opts: MatchOptions,
    concepts: &ConceptTable,
) -> Option<MatchTrace> {
    let query = query_term.to_lowercase();

    // 1. Exact token membership
    if content.contains(&query) {
        return Some(MatchTrace {
            rule: MatchRule::Exact,
            term: query,
        });
    }

    // 2. Substring: query inside a content token, never the reverse.
    // The reverse direction would let "and" match "sandbox".
    if opts.substring && query.len() >= 3 {
        if let Some(token) = content.tokens.iter().find(|t| t.contains(&query)) {
            return Some(MatchTrace {
                rule: MatchRule::Substring,
                term: token.clone(),
            });
        }
    }

    // 3. Compound: any split part of the query equals any split part of
    // the content. Content parts are already tokens (the tokenizer emits
    // them), so part-vs-part equality reduces to membership. Split the
    // original query term: case boundaries are gone after lowercasing.
    if opts.compound {
        for part in split_compound(query_term) {
            let part = part.to_lowercase();
            if part.len() >= 3 && part != query && content.contains(&part) {
                return Some(MatchTrace {
                    rule: MatchRule::Compound,
                    term: part,
                });
            }
        }
    }

    // 4. Fuzzy: both words ≥ 4 chars, same first two chars, length delta
    // and edit distance within the effective maximum.
    if opts.fuzzy && query.len() >= 4 {
        let max_edits = if query.len() <= 6 { 1 } else { 2 };
        for token in &content.tokens {
            if token.len() < 4 {
                continue;
            }
            if token.as_bytes().get(..2) != query.as_bytes().get(..2) {
                continue;
            }
            if token.len().abs_diff(query.len()) > max_edits {
                continue;
            }
            if levenshtein(&query, token) <= max_edits {
                return Some(MatchTrace {
                    rule: MatchRule::Fuzzy,
                    term: token.clone(),
                });
            }
        }
    }

    // 5. Concept expansion: a related term stands in for the query term.
    if opts.concepts {
        for related in concepts.related(&query) {
            if content.contains(related) {
                return Some(MatchTrace {
                    rule: MatchRule::Concept,
                    term: related.clone(),
                });
            }
        }
    }

    None
}

/// Classic two-row Levenshtein distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> ContentTokens {
        ContentTokens::new(text)
    }

    fn matched(query: &str, text: &str, opts: MatchOptions) -> Option<MatchRule> {
        enhanced_match(query, &tokens(text), opts, &ConceptTable::embedded()).map(|t| t.rule)
    }

    #[test]
    fn test_exact_membership() {
        assert_eq!(
            matched("runtime", "containerd runtime for wlxc", MatchOptions::direct()),
            Some(MatchRule::Exact)
        );
    }

    #[test]
    fn test_substring_is_one_directional() {
        // Query inside content token: match
        assert_eq!(
            matched("glicko", "Glicko-2 rating system", MatchOptions::direct()),
            Some(MatchRule::Exact) // the split part is itself a token
        );
        assert_eq!(
            matched("sock", "WebSocket communication", MatchOptions::direct()),
            Some(MatchRule::Substring)
        );
        // Content token inside a longer query term: no match
        assert_eq!(
            matched("sandbox", "box of tools", MatchOptions::direct()),
            None
        );
    }

    #[test]
    fn test_compound_split_match() {
        assert_eq!(
            matched("ReadMessage", "the ReadMessageItem helper", MatchOptions::direct()),
            Some(MatchRule::Substring) // "readmessage" ⊂ "readmessageitem"
        );
        // Compound proper: shared part, not a substring of the whole
        assert_eq!(
            matched("MessageReader", "the ReadMessageItem helper", MatchOptions::direct()),
            Some(MatchRule::Compound)
        );
    }

    #[test]
    fn test_fuzzy_guards() {
        // One edit within a short word
        assert_eq!(
            matched("tokio", "tokia runtime", MatchOptions::direct()),
            Some(MatchRule::Fuzzy)
        );
        // First-two-chars guard blocks cheap coincidences
        assert_eq!(matched("addle", "apple pie", MatchOptions::direct()), None);
        // Two edits need a long word
        assert_eq!(
            matched("postgress", "PostgreSQL database", MatchOptions::direct()),
            Some(MatchRule::Fuzzy)
        );
        // Under four chars, fuzzy never fires
        assert_eq!(matched("cat", "cap cab car", MatchOptions::direct()), None);
    }

    #[test]
    fn test_concepts_only_when_enabled() {
        let table = ConceptTable::with_entry("wlxc", &["windows", "container"]);
        let content = tokens("running a windows container locally");

        let full = enhanced_match("wlxc", &content, MatchOptions::full(), &table);
        assert_eq!(full.map(|t| t.rule), Some(MatchRule::Concept));

        let direct = enhanced_match("wlxc", &content, MatchOptions::direct(), &table);
        assert!(direct.is_none());
    }

    #[test]
    fn test_trace_describe() {
        let trace = enhanced_match(
            "sock",
            &tokens("WebSocket handler"),
            MatchOptions::direct(),
            &ConceptTable::empty(),
        )
        .unwrap();
        assert_eq!(trace.describe(), "substring:websocket");
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert_eq!(levenshtein("websockt", "websocket"), 1);
    }
}
