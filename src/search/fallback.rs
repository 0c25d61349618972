use std::path::Path;

use super::query::WeightedTerm;
use super::tiers::{tier2_coarse_filter, tier3_scan_session};
use super::ResultRow;
use crate::index::sessions::SessionsIndex;
use crate::matching::ConceptTable;
use crate::temporal::TemporalRange;

/// How many sessions a fallback scan will actually read.
const SCAN_LIMIT: usize = 30;

#[derive(Debug)]
pub struct FallbackOutcome {
    pub rows: Vec<ResultRow>,
    pub sessions_searched: usize,
}

/// Index-bypassing scan: Tier 2 and Tier 3 run directly over either the
/// temporally-filtered sessions or the most recently active ones. Sessions
/// whose stored topics mention a query token are scanned first, so the scan
/// cap spends its budget on the likeliest candidates.
pub fn fallback_scan(
    summaries: &SessionsIndex,
    sessions_dir: &Path,
    terms: &[WeightedTerm],
    tokens: &[String],
    original_query: &str,
    temporal: Option<&TemporalRange>,
    recent_limit: usize,
    concepts: &ConceptTable,
) -> FallbackOutcome {
    let mut candidates: Vec<String> = match temporal {
        Some(range) => {
            let filtered: Vec<String> = summaries
                .sessions
                .iter()
                .filter(|(_, s)| range.contains(&s.date))
                .map(|(id, _)| id.clone())
                .collect();
            tracing::debug!(
                "fallback: temporal filter '{}' kept {} sessions",
                range.matched,
                filtered.len()
            );
            let mut filtered = filtered;
            sort_recent_first(&mut filtered, summaries);
            filtered
        }
        None => summaries.recent_sessions(recent_limit.max(SCAN_LIMIT)),
    };

    // Topic priority: stored topics are cheap evidence of relevance
    if !tokens.is_empty() {
        let is_topic_hit = |id: &String| {
            summaries.sessions.get(id).is_some_and(|s| {
                s.topics
                    .iter()
                    .any(|topic| tokens.iter().any(|t| t == topic))
            })
        };
        candidates.sort_by_key(|id| !is_topic_hit(id)); // stable: hits first
    }

    let candidates = tier2_coarse_filter(candidates, terms, sessions_dir);
    let scan: Vec<&String> = candidates.iter().take(SCAN_LIMIT).collect();
    let sessions_searched = scan.len();

    let mut rows = Vec::new();
    for session_id in scan {
        let date = summaries
            .sessions
            .get(session_id)
            .map(|s| s.date.clone())
            .unwrap_or_else(|| "unknown".to_string());
        rows.extend(tier3_scan_session(
            session_id,
            &date,
            sessions_dir,
            terms,
            original_query,
            concepts,
        ));
    }

    FallbackOutcome {
        rows,
        sessions_searched,
    }
}

fn sort_recent_first(ids: &mut [String], summaries: &SessionsIndex) {
    ids.sort_by(|a, b| {
        let ta = summaries.sessions.get(a).map(|s| s.timestamp.as_str()).unwrap_or("");
        let tb = summaries.sessions.get(b).map(|s| s.timestamp.as_str()).unwrap_or("");
        tb.cmp(ta).then_with(|| a.cmp(b))
    });
}
