use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{save_atomic, MemoryPaths};
use crate::error::{EngineError, Result};
use crate::models::TranscriptRecord;
use crate::text::{is_stopword, raw_spans};

/// Maximum topics kept per session.
pub const MAX_TOPICS: usize = 12;

/// Sampling bounds for very long transcripts: the head and tail carry the
/// session's framing; the middle is mostly tool noise.
const SAMPLE_HEAD_LINES: usize = 200;
const SAMPLE_TAIL_LINES: usize = 300;
const SAMPLE_THRESHOLD: usize = 1000;

// ---------------------------------------------------------------------------
// Wire types (sessions-index.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub date: String,
    #[serde(rename = "messageCount", default)]
    pub message_count: u64,
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsIndex {
    pub kind: String,
    #[serde(rename = "projectDir", default)]
    pub project_dir: String,
    #[serde(rename = "sessionsDir", default)]
    pub sessions_dir: String,
    #[serde(rename = "lastUpdated", default)]
    pub last_updated: String,
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionSummary>,
}

pub const SESSIONS_INDEX_KIND: &str = "sessions-index";

impl SessionsIndex {
    pub fn empty(sessions_dir: &Path) -> Self {
        Self {
            kind: SESSIONS_INDEX_KIND.to_string(),
            project_dir: sessions_dir
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            sessions_dir: sessions_dir.to_string_lossy().to_string(),
            last_updated: String::new(),
            sessions: BTreeMap::new(),
        }
    }

    /// Most recent sessions by activity timestamp, newest first.
    pub fn recent_sessions(&self, limit: usize) -> Vec<String> {
        let mut entries: Vec<(&String, &SessionSummary)> = self.sessions.iter().collect();
        entries.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp));
        entries
            .into_iter()
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Read the sessions index; a missing file yields an empty one, a corrupt
/// file is an `IndexCorrupt` like the inverted index.
pub fn load_sessions_index(path: &Path, sessions_dir: &Path) -> Result<SessionsIndex> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(SessionsIndex::empty(sessions_dir))
        }
        Err(e) => return Err(EngineError::Io(e)),
    };
    serde_json::from_str(&data).map_err(|e| EngineError::IndexCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Summarization
// ---------------------------------------------------------------------------

/// Build summaries for every transcript in the directory and persist the
/// sessions index atomically. Unreadable files are warned about and treated
/// as empty sessions.
pub fn build_sessions_index(sessions_dir: &Path, paths: &MemoryPaths) -> Result<SessionsIndex> {
    paths.ensure_dir()?;
    let mut index = SessionsIndex::empty(sessions_dir);

    for path in super::build::transcript_files(sessions_dir)? {
        let session_id = match path.file_stem() {
            Some(stem) => stem.to_string_lossy().to_string(),
            None => continue,
        };
        match summarize_session(&path) {
            Ok(Some(summary)) => {
                index.sessions.insert(session_id, summary);
            }
            Ok(None) => {} // no messages — nothing to summarize
            Err(e) => {
                tracing::warn!("failed to summarize {}: {e}", path.display());
            }
        }
    }

    index.last_updated = Utc::now().to_rfc3339();
    save_atomic(&paths.sessions_index(), &index)?;
    tracing::info!(
        "sessions index: {} sessions summarized from {}",
        index.sessions.len(),
        sessions_dir.display()
    );
    Ok(index)
}

/// Summarize one transcript: message count, last-activity date, topics.
/// Returns None for transcripts with no user/assistant messages.
pub fn summarize_session(path: &Path) -> Result<Option<SessionSummary>> {
    let data = std::fs::read_to_string(path).map_err(|e| EngineError::TranscriptUnreadable {
        path: path.to_path_buf(),
        source: e,
    })?;

    let lines: Vec<&str> = data.lines().collect();
    let sampled: Vec<&str> = if lines.len() > SAMPLE_THRESHOLD {
        lines
            .iter()
            .take(SAMPLE_HEAD_LINES)
            .chain(lines.iter().skip(lines.len() - SAMPLE_TAIL_LINES))
            .copied()
            .collect()
    } else {
        lines
    };

    let mut texts: Vec<String> = Vec::new();
    let mut message_count = 0u64;
    let mut first_ts: Option<DateTime<Utc>> = None;
    let mut last_ts: Option<DateTime<Utc>> = None;

    for line in sampled {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<TranscriptRecord>(line) else {
            continue;
        };

        if let Some(ts) = record.timestamp.as_ref().and_then(|t| t.to_utc()) {
            if first_ts.is_none() {
                first_ts = Some(ts);
            }
            last_ts = Some(ts);
        }

        if !record.is_message() {
            continue;
        }
        message_count += 1;
        if let Some(payload) = &record.message {
            texts.push(payload.search_text());
        }
    }

    if message_count == 0 {
        return Ok(None);
    }

    // Last activity beats first: long-running sessions should sort by when
    // they were last touched.
    let when = last_ts
        .or(first_ts)
        .or_else(|| super::jsonl::file_mtime_utc(path))
        .unwrap_or_else(Utc::now);

    Ok(Some(SessionSummary {
        timestamp: when.to_rfc3339(),
        date: when.format("%Y-%m-%d").to_string(),
        message_count,
        topics: extract_topics(&texts.join("\n"), MAX_TOPICS),
    }))
}

// ---------------------------------------------------------------------------
// Topic extraction
// ---------------------------------------------------------------------------

struct WordInfo {
    count: u64,
    is_proper: bool,
}

/// Extract likely topics by keyword frequency, heavily boosting proper
/// nouns, acronyms, compound forms, and digit-bearing tokens — the forms
/// that name projects and tools rather than describe them.
pub fn extract_topics(text: &str, top_n: usize) -> Vec<String> {
    let mut words: BTreeMap<String, WordInfo> = BTreeMap::new();

    for word in raw_spans(text) {
        let lower = word.to_lowercase();
        if lower.len() < 3 || is_stopword(&lower) {
            continue;
        }

        let is_proper = is_proper_form(word);
        let entry = words.entry(lower).or_insert(WordInfo {
            count: 0,
            is_proper: false,
        });
        entry.count += 1;
        entry.is_proper |= is_proper;
    }

    let mut scored: Vec<(String, f64, bool)> = words
        .into_iter()
        .map(|(word, info)| {
            let mut score = info.count as f64;
            if info.is_proper {
                score *= 5.0;
            }
            if word.len() >= 6 {
                score *= 1.5;
            }
            if word.contains('-') || word.contains('_') {
                score *= 2.0;
            }
            if word.chars().any(|c| c.is_ascii_digit()) {
                score *= 1.5;
            }
            (word, score, info.is_proper)
        })
        .collect();

    // Score descending; the BTreeMap origin makes ties alphabetical, so the
    // output is stable across runs.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut result: Vec<String> = scored
        .iter()
        .filter(|(_, _, proper)| *proper)
        .take(5)
        .map(|(w, _, _)| w.clone())
        .collect();

    for (word, _, proper) in &scored {
        if result.len() >= top_n {
            break;
        }
        if !proper && !result.contains(word) {
            result.push(word.clone());
        }
    }

    result.truncate(top_n);
    result
}

/// Proper-noun / technical-term detection on the original-case form:
/// acronyms (WLXC), PascalCase (PostgreSQL), CamelCase (ChessRT), short
/// all-lowercase project names (wlxc, helm), compounds, versioned tokens.
fn is_proper_form(word: &str) -> bool {
    let has_upper = word.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = word.chars().any(|c| c.is_ascii_lowercase());
    let all_upper = has_upper && !has_lower;
    let first_upper = word.chars().next().is_some_and(|c| c.is_ascii_uppercase());

    let is_short_technical = (4..=6).contains(&word.len())
        && !has_upper
        && word.chars().all(|c| c.is_ascii_alphanumeric());

    (all_upper && word.len() >= 2)
        || (first_upper && has_lower && word.len() > 1)
        || is_short_technical
        || word.contains('-')
        || word.contains('_')
        || word.chars().any(|c| c.is_ascii_digit())
}
