pub mod fallback;
pub mod query;
pub mod tiers;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};

use crate::config::{HindsightConfig, SearchConfig};
use crate::error::{EngineError, Result};
use crate::index::sessions::SessionsIndex;
use crate::index::{build::build_index, load_index, InvertedIndex, MemoryPaths};
use crate::matching::ConceptTable;
use crate::temporal::{parse_temporal, TemporalRange};

use fallback::fallback_scan;
use query::{extract_keywords, query_tokens};
use tiers::{tier1_candidates, tier2_coarse_filter, tier3_scan_session};

// ---------------------------------------------------------------------------
// Options and result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Skip temporal parsing and use this range instead.
    pub temporal_override: Option<TemporalRange>,
    pub max_results: Option<usize>,
    /// When false, Tier 2 is skipped and Tier 3 runs over the raw
    /// candidate list (capped).
    pub use_three_tier: bool,
    /// Build the index when missing or stale before searching.
    pub auto_index: bool,
    /// Reference date for temporal parsing; defaults to the local today.
    pub reference_date: Option<NaiveDate>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            temporal_override: None,
            max_results: None,
            use_three_tier: true,
            auto_index: true,
            reference_date: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    pub session: String,
    pub role: String,
    pub text_snippet: String,
    pub timestamp: String,
    pub date: String,
    pub match_count: usize,
    pub match_score: f64,
    pub exact_phrase: bool,
    pub match_info: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPath {
    Index,
    Fallback,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TierTimes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier1_index_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier2_coarse_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier3_enhanced_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_scan_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemporalInfo {
    pub start: String,
    pub end: String,
    pub matched: String,
}

impl From<&TemporalRange> for TemporalInfo {
    fn from(range: &TemporalRange) -> Self {
        Self {
            start: range.start_string(),
            end: range.end_string(),
            matched: range.matched.clone(),
        }
    }
}

/// A structured error carried inside an otherwise well-formed result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchIssue {
    pub kind: String,
    pub message: String,
}

impl From<&EngineError> for SearchIssue {
    fn from(err: &EngineError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub query: String,
    pub results: Vec<ResultRow>,
    pub sessions_searched: usize,
    pub sessions_total: usize,
    pub candidates_found: usize,
    pub search_path: SearchPath,
    pub index_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal: Option<TemporalInfo>,
    pub total_time_ms: f64,
    pub tier_times_ms: TierTimes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SearchIssue>,
}

impl SearchResult {
    pub fn exact_phrase_count(&self) -> usize {
        self.results.iter().filter(|r| r.exact_phrase).count()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

type Cached<T> = RwLock<Option<(SystemTime, Arc<T>)>>;

/// The retrieval engine: owns the file paths, configuration, concept table,
/// and the mtime-invalidated caches of the two index files. Queries take
/// `&self`; the refresh/update side writes the files and the caches notice.
pub struct Engine {
    paths: MemoryPaths,
    sessions_dir: PathBuf,
    search_cfg: SearchConfig,
    lock_timeout: Duration,
    concepts: ConceptTable,
    index_cache: Cached<InvertedIndex>,
    summaries_cache: Cached<SessionsIndex>,
}

impl Engine {
    pub fn new(config: &HindsightConfig) -> Self {
        Self::with_paths(
            MemoryPaths::new(config.resolved_memory_dir()),
            config.resolved_sessions_dir(),
            config.search.clone(),
            Duration::from_secs(config.index.lock_timeout_secs),
        )
    }

    pub fn with_paths(
        paths: MemoryPaths,
        sessions_dir: PathBuf,
        search_cfg: SearchConfig,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            paths,
            sessions_dir,
            search_cfg,
            lock_timeout,
            concepts: ConceptTable::embedded(),
            index_cache: RwLock::new(None),
            summaries_cache: RwLock::new(None),
        }
    }

    pub fn paths(&self) -> &MemoryPaths {
        &self.paths
    }

    pub fn sessions_dir(&self) -> &std::path::Path {
        &self.sessions_dir
    }

    /// Run one query end to end. Never panics and never returns a hard
    /// error: failures degrade to an empty result with `error` populated.
    pub fn search(&self, raw_query: &str, opts: &SearchOptions) -> SearchResult {
        let start = Instant::now();
        let query = raw_query.trim();
        let max_results = opts.max_results.unwrap_or(self.search_cfg.max_results);
        let reference = opts
            .reference_date
            .unwrap_or_else(|| Local::now().date_naive());

        let temporal = opts
            .temporal_override
            .clone()
            .or_else(|| parse_temporal(query, reference));

        let tokens = query_tokens(query);
        let terms = extract_keywords(query);

        let mut result = SearchResult {
            query: query.to_string(),
            results: Vec::new(),
            sessions_searched: 0,
            sessions_total: 0,
            candidates_found: 0,
            search_path: SearchPath::Index,
            index_hit: false,
            temporal: temporal.as_ref().map(TemporalInfo::from),
            total_time_ms: 0.0,
            tier_times_ms: TierTimes::default(),
            error: None,
        };

        // Nothing searchable: empty results, not an error
        if tokens.is_empty() || terms.is_empty() {
            result.total_time_ms = elapsed_ms(start);
            return result;
        }

        // Index first: an auto-build rewrites the session summaries too,
        // so they must be loaded after it.
        let index_outcome = self.load_or_build_index(opts.auto_index);

        let summaries = self.load_summaries().unwrap_or_else(|e| {
            tracing::warn!("sessions index unavailable: {e}");
            Arc::new(SessionsIndex::empty(&self.sessions_dir))
        });
        result.sessions_total = summaries.sessions.len();

        match index_outcome {
            Ok(index) => {
                let tier1_start = Instant::now();
                let tier1 = tier1_candidates(&index, &tokens, temporal.as_ref(), &summaries);
                result.tier_times_ms.tier1_index_ms = Some(elapsed_ms(tier1_start));
                result.candidates_found = tier1.candidates.len();

                if tier1.any_token_hit && !tier1.candidates.is_empty() {
                    result.index_hit = true;

                    let tier2_start = Instant::now();
                    let survivors = if opts.use_three_tier {
                        tier2_coarse_filter(tier1.candidates, &terms, &self.sessions_dir)
                    } else {
                        let mut c = tier1.candidates;
                        c.truncate(40);
                        c
                    };
                    result.tier_times_ms.tier2_coarse_ms = Some(elapsed_ms(tier2_start));

                    let tier3_start = Instant::now();
                    let mut rows = Vec::new();
                    for session_id in &survivors {
                        let date = summaries
                            .sessions
                            .get(session_id)
                            .map(|s| s.date.clone())
                            .unwrap_or_else(|| "unknown".to_string());
                        rows.extend(tier3_scan_session(
                            session_id,
                            &date,
                            &self.sessions_dir,
                            &terms,
                            query,
                            &self.concepts,
                        ));
                    }
                    result.tier_times_ms.tier3_enhanced_ms = Some(elapsed_ms(tier3_start));
                    result.sessions_searched = survivors.len();

                    if !rows.is_empty() {
                        result.results = rank(rows, max_results);
                        result.total_time_ms = elapsed_ms(start);
                        tracing::info!(
                            "index search: {} results from {} sessions in {:.1}ms",
                            result.results.len(),
                            result.sessions_searched,
                            result.total_time_ms
                        );
                        return result;
                    }
                }
                // Zero candidates or zero scored rows — fall back to scan
            }
            Err(err @ EngineError::IndexCorrupt { .. })
            | Err(err @ EngineError::LockTimeout { .. }) => {
                // Corrupt index aborts the query; lock contention surfaces
                // rather than being retried behind the caller's back.
                tracing::warn!("query aborted: {err}");
                result.error = Some(SearchIssue::from(&err));
                result.total_time_ms = elapsed_ms(start);
                return result;
            }
            Err(err @ EngineError::IndexMissing { .. }) => {
                // No index and auto-build disabled: the scan still runs,
                // but the caller is told the index path was never taken.
                tracing::warn!("{err}");
                result.error = Some(SearchIssue::from(&err));
            }
            Err(err) => {
                tracing::warn!("index unavailable, scanning instead: {err}");
            }
        }

        let fallback_start = Instant::now();
        let outcome = fallback_scan(
            &summaries,
            &self.sessions_dir,
            &terms,
            &tokens,
            query,
            temporal.as_ref(),
            self.search_cfg.recent_session_limit,
            &self.concepts,
        );
        result.tier_times_ms.fallback_scan_ms = Some(elapsed_ms(fallback_start));
        result.search_path = SearchPath::Fallback;
        result.index_hit = false;
        result.sessions_searched = outcome.sessions_searched;
        result.results = rank(outcome.rows, max_results);
        result.total_time_ms = elapsed_ms(start);

        tracing::info!(
            "fallback scan: {} results from {} sessions in {:.1}ms",
            result.results.len(),
            result.sessions_searched,
            result.total_time_ms
        );
        result
    }

    /// Load the inverted index, building it first when it is missing or
    /// stale and auto-indexing is allowed.
    fn load_or_build_index(&self, auto_index: bool) -> Result<Arc<InvertedIndex>> {
        let path = self.paths.inverted_index();

        let needs_build = if !path.exists() {
            if !auto_index {
                return Err(EngineError::IndexMissing { path });
            }
            tracing::info!("index missing, building");
            true
        } else if auto_index && self.index_age() > Duration::from_secs(self.search_cfg.stale_after_secs)
        {
            tracing::info!("index stale, rebuilding");
            true
        } else {
            false
        };

        if needs_build {
            build_index(&self.sessions_dir, &self.paths, self.lock_timeout)?;
            self.invalidate_caches();
        }

        self.load_index_cached()
    }

    fn index_age(&self) -> Duration {
        std::fs::metadata(self.paths.inverted_index())
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .unwrap_or(Duration::ZERO)
    }

    fn load_index_cached(&self) -> Result<Arc<InvertedIndex>> {
        let path = self.paths.inverted_index();
        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

        if let Some(mtime) = mtime {
            if let Some((cached_at, index)) = self
                .index_cache
                .read()
                .expect("index cache poisoned")
                .as_ref()
            {
                if *cached_at == mtime {
                    return Ok(index.clone());
                }
            }
        }

        let index = Arc::new(load_index(&path)?);
        if let Some(mtime) = mtime {
            *self.index_cache.write().expect("index cache poisoned") =
                Some((mtime, index.clone()));
        }
        Ok(index)
    }

    fn load_summaries(&self) -> Result<Arc<SessionsIndex>> {
        let path = self.paths.sessions_index();
        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

        if let Some(mtime) = mtime {
            if let Some((cached_at, summaries)) = self
                .summaries_cache
                .read()
                .expect("summaries cache poisoned")
                .as_ref()
            {
                if *cached_at == mtime {
                    return Ok(summaries.clone());
                }
            }
        }

        let summaries = Arc::new(crate::index::sessions::load_sessions_index(
            &path,
            &self.sessions_dir,
        )?);
        if let Some(mtime) = mtime {
            *self
                .summaries_cache
                .write()
                .expect("summaries cache poisoned") = Some((mtime, summaries.clone()));
        }
        Ok(summaries)
    }

    fn invalidate_caches(&self) {
        *self.index_cache.write().expect("index cache poisoned") = None;
        *self
            .summaries_cache
            .write()
            .expect("summaries cache poisoned") = None;
    }
}

/// Sort by score descending (stable on ties) and truncate.
fn rank(mut rows: Vec<ResultRow>, max_results: usize) -> Vec<ResultRow> {
    rows.sort_by(|a, b| {
        b.match_score
            .partial_cmp(&a.match_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows.truncate(max_results);
    rows
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn engine(tmp: &TempDir) -> Engine {
        Engine::with_paths(
            MemoryPaths::new(tmp.path().join("memory")),
            tmp.path().join("sessions"),
            SearchConfig::default(),
            Duration::from_secs(1),
        )
    }

    fn write_session(tmp: &TempDir, id: &str, texts: &[(&str, &str)]) {
        let dir = tmp.path().join("sessions");
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = std::fs::File::create(dir.join(format!("{id}.jsonl"))).unwrap();
        for (ts, text) in texts {
            writeln!(
                f,
                r#"{{"type":"message","timestamp":"{ts}","message":{{"role":"user","content":{}}}}}"#,
                serde_json::to_string(text).unwrap()
            )
            .unwrap();
        }
    }

    #[test]
    fn test_empty_query_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = engine(&tmp).search("", &SearchOptions::default());
        assert!(result.results.is_empty());
        assert!(result.error.is_none());

        let result = engine(&tmp).search("the a an of", &SearchOptions::default());
        assert!(result.results.is_empty());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_index_path_finds_results() {
        let tmp = TempDir::new().unwrap();
        write_session(
            &tmp,
            "sess-a",
            &[("2026-01-05T10:00:00Z", "Glicko-2 rating system for ChessRT leaderboard")],
        );

        let engine = engine(&tmp);
        let result = engine.search("glicko rating", &SearchOptions::default());
        assert_eq!(result.search_path, SearchPath::Index);
        assert!(result.index_hit);
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].session, "sess-a");
        assert!(result.tier_times_ms.tier1_index_ms.is_some());
    }

    #[test]
    fn test_missing_index_without_auto_reports_and_falls_back() {
        let tmp = TempDir::new().unwrap();
        write_session(
            &tmp,
            "sess-a",
            &[("2026-01-05T10:00:00Z", "discussing oauth scopes")],
        );
        let engine = engine(&tmp);
        let result = engine.search(
            "oauth scopes",
            &SearchOptions {
                auto_index: false,
                ..SearchOptions::default()
            },
        );
        // The scan still runs, but the skipped index path is reported
        assert_eq!(result.search_path, SearchPath::Fallback);
        assert!(!result.index_hit);
        let issue = result.error.expect("missing index must be surfaced");
        assert_eq!(issue.kind, "IndexMissing");
    }

    #[test]
    fn test_corrupt_index_aborts_query() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        engine.paths().ensure_dir().unwrap();
        std::fs::write(engine.paths().inverted_index(), "{broken").unwrap();

        let result = engine.search("anything real", &SearchOptions::default());
        assert!(result.results.is_empty());
        let issue = result.error.unwrap();
        assert_eq!(issue.kind, "IndexCorrupt");
    }

    #[test]
    fn test_cache_reloads_on_mtime_change() {
        let tmp = TempDir::new().unwrap();
        write_session(
            &tmp,
            "sess-a",
            &[("2026-01-05T10:00:00Z", "first topic alpha discussion")],
        );
        let engine = engine(&tmp);
        let r1 = engine.search("alpha discussion", &SearchOptions::default());
        assert_eq!(r1.results.len(), 1);

        // Grow the corpus and rebuild; mtime moves, cache must notice
        write_session(
            &tmp,
            "sess-b",
            &[("2026-01-06T10:00:00Z", "second topic alpha discussion")],
        );
        // Filesystem mtime granularity can swallow sub-second rebuilds
        std::thread::sleep(std::time::Duration::from_millis(1100));
        crate::index::build::build_index(
            engine.sessions_dir(),
            engine.paths(),
            Duration::from_secs(1),
        )
        .unwrap();

        let r2 = engine.search("alpha discussion", &SearchOptions::default());
        let sessions: std::collections::HashSet<_> =
            r2.results.iter().map(|r| r.session.as_str()).collect();
        assert!(sessions.contains("sess-b"));
    }
}
