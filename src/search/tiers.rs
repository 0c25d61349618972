use std::collections::HashSet;
use std::path::Path;

use super::query::WeightedTerm;
use super::ResultRow;
use crate::index::jsonl::TranscriptReader;
use crate::index::sessions::SessionsIndex;
use crate::index::InvertedIndex;
use crate::matching::{enhanced_match, ConceptTable, ContentTokens, MatchOptions};
use crate::temporal::TemporalRange;

/// Tier-2 only prunes when the candidate set is larger than this.
const COARSE_FILTER_THRESHOLD: usize = 30;
/// Tier-2 survivor cap.
const COARSE_KEEP: usize = 40;
/// Tier-3 emits at most this many rows per session.
const MAX_ROWS_PER_SESSION: usize = 3;

/// Snippet window around the earliest matched term.
const SNIPPET_BEFORE: usize = 100;
const SNIPPET_AFTER: usize = 400;
const SNIPPET_FALLBACK_LEN: usize = 500;

// ---------------------------------------------------------------------------
// Tier 1: index lookup
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Tier1Outcome {
    /// Candidate session IDs, most recently active first.
    pub candidates: Vec<String>,
    pub matched_tokens: Vec<String>,
    /// Whether any query token had a posting list at all.
    pub any_token_hit: bool,
}

/// Intersect the posting lists of every query token that the index knows,
/// smallest set first. An empty intersection (with at least one hit) widens
/// to the union. A temporal range then filters strictly by session date.
pub fn tier1_candidates(
    index: &InvertedIndex,
    tokens: &[String],
    temporal: Option<&TemporalRange>,
    summaries: &SessionsIndex,
) -> Tier1Outcome {
    let mut outcome = Tier1Outcome::default();

    let mut posting_sets: Vec<HashSet<&str>> = Vec::new();
    for token in tokens {
        if let Some(set) = index.sessions_for_token(token) {
            posting_sets.push(set);
            outcome.matched_tokens.push(token.clone());
        }
    }
    if posting_sets.is_empty() {
        return outcome;
    }
    outcome.any_token_hit = true;

    posting_sets.sort_by_key(|s| s.len());
    let mut result: HashSet<&str> = posting_sets[0].clone();
    for set in &posting_sets[1..] {
        result.retain(|s| set.contains(s));
        if result.is_empty() {
            break;
        }
    }

    if result.is_empty() {
        // Too strict — any session mentioning any term stays a candidate
        for set in &posting_sets {
            result.extend(set.iter().copied());
        }
    }

    let mut candidates: Vec<String> = result
        .into_iter()
        .filter(|id| match temporal {
            Some(range) => summaries
                .sessions
                .get(*id)
                .is_some_and(|s| range.contains(&s.date)),
            None => true,
        })
        .map(|s| s.to_string())
        .collect();

    // Most recently active first; unknown sessions sort last. Determinism
    // matters here because Tier 2 may cap the list.
    candidates.sort_by(|a, b| {
        let ta = summaries.sessions.get(a).map(|s| s.timestamp.as_str()).unwrap_or("");
        let tb = summaries.sessions.get(b).map(|s| s.timestamp.as_str()).unwrap_or("");
        tb.cmp(ta).then_with(|| a.cmp(b))
    });

    outcome.candidates = candidates;
    outcome
}

// ---------------------------------------------------------------------------
// Tier 2: streaming coarse filter
// ---------------------------------------------------------------------------

/// Score each candidate by the fraction of query terms that appear anywhere
/// in its transcript as a case-insensitive substring, short-circuiting per
/// term. Small candidate sets pass through untouched.
pub fn tier2_coarse_filter(
    candidates: Vec<String>,
    terms: &[WeightedTerm],
    sessions_dir: &Path,
) -> Vec<String> {
    if candidates.len() <= COARSE_FILTER_THRESHOLD {
        return candidates;
    }

    let needles: Vec<&str> = terms
        .iter()
        .map(|t| t.term.as_str())
        .filter(|t| t.len() >= 3)
        .collect();
    if needles.is_empty() {
        return candidates;
    }

    let mut scored: Vec<(String, f64)> = candidates
        .into_iter()
        .map(|id| {
            let score = coarse_session_score(&id, &needles, sessions_dir);
            (id, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(COARSE_KEEP);
    scored.into_iter().map(|(id, _)| id).collect()
}

fn coarse_session_score(session_id: &str, needles: &[&str], sessions_dir: &Path) -> f64 {
    let path = sessions_dir.join(format!("{session_id}.jsonl"));
    let mut reader = match TranscriptReader::open(&path, -1) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("tier2: {e}");
            return 0.0;
        }
    };

    let mut remaining: Vec<&str> = needles.to_vec();
    let mut found = 0usize;

    loop {
        match reader.next_message() {
            Ok(Some(msg)) => {
                let text = msg.payload.search_text().to_lowercase();
                remaining.retain(|needle| {
                    if text.contains(needle) {
                        found += 1;
                        false
                    } else {
                        true
                    }
                });
                if remaining.is_empty() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("tier2: read error in {}: {e}", path.display());
                break;
            }
        }
    }

    found as f64 / needles.len() as f64
}

// ---------------------------------------------------------------------------
// Tier 3: enhanced scoring
// ---------------------------------------------------------------------------

/// Re-scan one session with the full matcher and emit scored rows.
///
/// Concept expansion is on for scoring, but when the query carries
/// high-weight terms at least one of them must match with concepts off —
/// a concept chain alone cannot admit a message.
pub fn tier3_scan_session(
    session_id: &str,
    date: &str,
    sessions_dir: &Path,
    terms: &[WeightedTerm],
    original_query: &str,
    concepts: &ConceptTable,
) -> Vec<ResultRow> {
    let path = sessions_dir.join(format!("{session_id}.jsonl"));
    let mut reader = match TranscriptReader::open(&path, -1) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("tier3: {e}");
            return Vec::new();
        }
    };

    let high_weight: Vec<&WeightedTerm> = terms.iter().filter(|t| t.is_high_weight()).collect();
    let mut rows = Vec::new();

    loop {
        let msg = match reader.next_message() {
            Ok(Some(m)) => m,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("tier3: read error in {}: {e}", path.display());
                break;
            }
        };

        let text = msg.payload.search_text();
        if text.trim().is_empty() {
            continue;
        }
        let content = ContentTokens::new(&text);
        if content.is_empty() {
            continue;
        }

        let mut match_count = 0usize;
        let mut weighted_score = 0.0f64;
        let mut match_info: Vec<String> = Vec::new();
        let mut matched_terms: Vec<&str> = Vec::new();

        for term in terms {
            if let Some(trace) = enhanced_match(&term.term, &content, MatchOptions::full(), concepts)
            {
                match_count += 1;
                weighted_score += term.weight;
                matched_terms.push(term.term.as_str());
                match_info.push(trace.describe());
            }
        }
        if match_count == 0 {
            continue;
        }

        // Adversarial guard: a high-weight term must hold up without
        // concept expansion, or the message is rejected outright.
        if !high_weight.is_empty() {
            let direct_hit = high_weight.iter().any(|t| {
                enhanced_match(&t.term, &content, MatchOptions::direct(), concepts).is_some()
            });
            if !direct_hit {
                continue;
            }
        }

        let exact_phrase = check_exact_phrase(original_query, &text);
        let exact_bonus = if exact_phrase { 10.0 } else { 0.0 };
        let coverage_bonus = 5.0 * match_count as f64 / terms.len() as f64;
        let score = weighted_score + exact_bonus + coverage_bonus;

        if exact_phrase {
            match_info.insert(0, "EXACT_PHRASE".to_string());
        }
        match_info.truncate(3);

        rows.push(ResultRow {
            session: session_id.to_string(),
            role: msg.payload.role.clone(),
            text_snippet: extract_snippet(&text, &matched_terms),
            timestamp: msg.timestamp.map(|t| t.to_rfc3339()).unwrap_or_default(),
            date: date.to_string(),
            match_count,
            match_score: score,
            exact_phrase,
            match_info,
        });

        if rows.len() >= MAX_ROWS_PER_SESSION {
            break;
        }
    }

    rows
}

/// Whitespace-normalized, case-insensitive containment of the whole query.
pub fn check_exact_phrase(query: &str, text: &str) -> bool {
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let query = normalize(query);
    if query.is_empty() {
        return false;
    }
    normalize(text).contains(&query)
}

// ---------------------------------------------------------------------------
// Snippets
// ---------------------------------------------------------------------------

/// Cut a window from 100 chars before through 400 chars after the earliest
/// matched term, with ellipses marking truncation. Falls back to the head
/// of the text when no term is directly findable (concept/fuzzy matches).
pub fn extract_snippet(text: &str, matched_terms: &[&str]) -> String {
    let lower = text.to_lowercase();
    // Byte offsets in the lowered copy only line up when lowering didn't
    // change lengths; otherwise search the original and accept misses.
    let haystack: &str = if lower.len() == text.len() { &lower } else { text };

    let earliest = matched_terms
        .iter()
        .filter_map(|term| haystack.find(&term.to_lowercase()))
        .min();

    match earliest {
        Some(pos) => {
            let start = floor_boundary(text, pos.saturating_sub(SNIPPET_BEFORE));
            let end = floor_boundary(text, (pos + SNIPPET_AFTER).min(text.len()));
            let mut snippet = String::new();
            if start > 0 {
                snippet.push_str("...");
            }
            snippet.push_str(&text[start..end]);
            if end < text.len() {
                snippet.push_str("...");
            }
            snippet
        }
        None => {
            let end = floor_boundary(text, SNIPPET_FALLBACK_LEN.min(text.len()));
            let mut snippet = text[..end].to_string();
            if end < text.len() {
                snippet.push_str("...");
            }
            snippet
        }
    }
}

fn floor_boundary(text: &str, mut pos: usize) -> usize {
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::sessions::SessionSummary;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn index_with(entries: &[(&str, &[&str])]) -> InvertedIndex {
        // entries: (token, session ids)
        let mut idx = InvertedIndex::empty();
        for (token, sessions) in entries {
            for (i, session) in sessions.iter().enumerate() {
                idx.terms.entry(token.to_string()).or_default().push(
                    crate::index::Posting {
                        session: session.to_string(),
                        msg_idx: i as u64,
                        timestamp: String::new(),
                    },
                );
            }
        }
        idx
    }

    fn summaries_with(dates: &[(&str, &str)]) -> SessionsIndex {
        let mut s = SessionsIndex::empty(Path::new("/tmp"));
        for (id, date) in dates {
            s.sessions.insert(
                id.to_string(),
                SessionSummary {
                    timestamp: format!("{date}T12:00:00+00:00"),
                    date: date.to_string(),
                    message_count: 1,
                    topics: vec![],
                },
            );
        }
        s
    }

    #[test]
    fn test_tier1_intersection() {
        let idx = index_with(&[
            ("auth", &["s1", "s2", "s3"]),
            ("tokens", &["s2", "s3"]),
            ("jwt", &["s3"]),
        ]);
        let summaries = summaries_with(&[
            ("s1", "2026-01-01"),
            ("s2", "2026-01-02"),
            ("s3", "2026-01-03"),
        ]);

        let out = tier1_candidates(
            &idx,
            &["auth".into(), "tokens".into(), "jwt".into()],
            None,
            &summaries,
        );
        assert!(out.any_token_hit);
        assert_eq!(out.candidates, vec!["s3"]);
    }

    #[test]
    fn test_tier1_union_rescue() {
        let idx = index_with(&[("auth", &["s1"]), ("chess", &["s2"])]);
        let summaries = summaries_with(&[("s1", "2026-01-01"), ("s2", "2026-01-02")]);

        let out = tier1_candidates(&idx, &["auth".into(), "chess".into()], None, &summaries);
        // Intersection is empty; union keeps both, newest first
        assert_eq!(out.candidates, vec!["s2", "s1"]);
    }

    #[test]
    fn test_tier1_no_hits() {
        let idx = index_with(&[("auth", &["s1"])]);
        let summaries = summaries_with(&[("s1", "2026-01-01")]);

        let out = tier1_candidates(&idx, &["kubernetes".into()], None, &summaries);
        assert!(!out.any_token_hit);
        assert!(out.candidates.is_empty());
    }

    #[test]
    fn test_tier1_temporal_filter_is_strict() {
        let idx = index_with(&[("auth", &["s1", "s2"])]);
        let summaries = summaries_with(&[("s1", "2026-01-01"), ("s2", "2026-01-10")]);
        let range = TemporalRange {
            start: chrono::NaiveDate::from_ymd_opt(2026, 1, 9).unwrap(),
            end: chrono::NaiveDate::from_ymd_opt(2026, 1, 11).unwrap(),
            matched: "yesterday".into(),
        };

        let out = tier1_candidates(&idx, &["auth".into()], Some(&range), &summaries);
        assert_eq!(out.candidates, vec!["s2"]);

        // A range nothing falls into leaves zero candidates but keeps the hit flag
        let empty_range = TemporalRange {
            start: chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            end: chrono::NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(),
            matched: String::new(),
        };
        let out = tier1_candidates(&idx, &["auth".into()], Some(&empty_range), &summaries);
        assert!(out.any_token_hit);
        assert!(out.candidates.is_empty());
    }

    fn write_session(dir: &Path, id: &str, texts: &[&str]) {
        let mut f = std::fs::File::create(dir.join(format!("{id}.jsonl"))).unwrap();
        for text in texts {
            writeln!(
                f,
                r#"{{"type":"message","timestamp":"2026-01-05T10:00:00Z","message":{{"role":"user","content":{}}}}}"#,
                serde_json::to_string(text).unwrap()
            )
            .unwrap();
        }
    }

    fn terms(words: &[(&str, f64)]) -> Vec<WeightedTerm> {
        words
            .iter()
            .map(|(w, weight)| WeightedTerm {
                term: w.to_string(),
                weight: *weight,
            })
            .collect()
    }

    #[test]
    fn test_tier2_small_sets_pass_through() {
        let candidates = vec!["a".to_string(), "b".to_string()];
        let kept = tier2_coarse_filter(
            candidates.clone(),
            &terms(&[("auth", 1.0)]),
            &PathBuf::from("/nonexistent"),
        );
        assert_eq!(kept, candidates);
    }

    #[test]
    fn test_tier2_ranks_by_term_coverage() {
        let tmp = TempDir::new().unwrap();
        // 31 sessions forces the coarse pass; one matches both terms,
        // one matches one term, the rest match nothing
        write_session(tmp.path(), "both", &["rate limit policy draft"]);
        write_session(tmp.path(), "half", &["rate card for billing"]);
        for i in 0..29 {
            write_session(tmp.path(), &format!("noise{i}"), &["unrelated chatter"]);
        }

        let mut candidates: Vec<String> = vec!["both".into(), "half".into()];
        candidates.extend((0..29).map(|i| format!("noise{i}")));

        let kept = tier2_coarse_filter(
            candidates,
            &terms(&[("rate", 1.5), ("limit", 1.5)]),
            tmp.path(),
        );
        assert_eq!(kept[0], "both");
        assert_eq!(kept[1], "half");
    }

    #[test]
    fn test_tier3_scoring_and_exact_phrase() {
        let tmp = TempDir::new().unwrap();
        write_session(
            tmp.path(),
            "s1",
            &["we should enforce a rate limit policy on the api"],
        );

        let rows = tier3_scan_session(
            "s1",
            "2026-01-05",
            tmp.path(),
            &terms(&[("rate", 1.5), ("limit", 1.5), ("policy", 1.5)]),
            "rate limit policy",
            &ConceptTable::empty(),
        );
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert!(row.exact_phrase);
        assert_eq!(row.match_count, 3);
        // weighted 4.5 + exact 10 + coverage 5
        assert!((row.match_score - 19.5).abs() < 1e-9);
        assert_eq!(row.match_info[0], "EXACT_PHRASE");
    }

    #[test]
    fn test_tier3_caps_rows_per_session() {
        let tmp = TempDir::new().unwrap();
        write_session(
            tmp.path(),
            "s1",
            &[
                "auth discussion one",
                "auth discussion two",
                "auth discussion three",
                "auth discussion four",
            ],
        );

        let rows = tier3_scan_session(
            "s1",
            "2026-01-05",
            tmp.path(),
            &terms(&[("auth", 1.5)]),
            "auth",
            &ConceptTable::empty(),
        );
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_tier3_concept_guard_rejects_indirect_only() {
        let tmp = TempDir::new().unwrap();
        write_session(tmp.path(), "s1", &["running a windows container locally"]);

        let table = crate::matching::ConceptTable::with_entry("wlxc", &["windows", "container"]);
        let rows = tier3_scan_session(
            "s1",
            "2026-01-05",
            tmp.path(),
            &terms(&[("wlxc", 1.5)]),
            "wlxc",
            &table,
        );
        // Concept expansion matched, but the high-weight term never
        // appeared directly — the session is rejected.
        assert!(rows.is_empty());
    }

    #[test]
    fn test_tier3_low_weight_concept_match_allowed() {
        let tmp = TempDir::new().unwrap();
        write_session(tmp.path(), "s1", &["the oauth flow needs a refresh token"]);

        let table = crate::matching::ConceptTable::with_entry("authentication", &["oauth"]);
        let rows = tier3_scan_session(
            "s1",
            "2026-01-05",
            tmp.path(),
            &terms(&[("authentication", 1.0)]),
            "authentication flow",
            &table,
        );
        // No high-weight terms in play, so a concept match stands
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_snippet_window() {
        let long_prefix = "x".repeat(300);
        let long_suffix = "y".repeat(600);
        let text = format!("{long_prefix} glicko rating here {long_suffix}");

        let snippet = extract_snippet(&text, &["glicko"]);
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert!(snippet.contains("glicko rating here"));
        // 100 before + match + 400 after, plus the ellipses
        assert!(snippet.len() <= SNIPPET_BEFORE + SNIPPET_AFTER + 6);
    }

    #[test]
    fn test_snippet_fallback_head() {
        let text = "a ".repeat(400);
        let snippet = extract_snippet(&text, &["missing"]);
        assert!(snippet.ends_with("..."));
        assert!(snippet.len() <= SNIPPET_FALLBACK_LEN + 3);
    }

    #[test]
    fn test_exact_phrase_normalization() {
        assert!(check_exact_phrase(
            "rate  limit   policy",
            "We shipped the Rate Limit Policy yesterday"
        ));
        assert!(!check_exact_phrase("rate limit policy", "rate policy limit"));
        assert!(!check_exact_phrase("", "anything"));
    }
}
