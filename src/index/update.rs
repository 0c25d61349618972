use chrono::Utc;
use std::path::Path;
use std::time::{Duration, Instant};

use super::jsonl::{file_mtime_utc, TranscriptReader};
use super::lock::IndexLock;
use super::{load_index, save_atomic, MemoryPaths};
use crate::error::Result;
use crate::text::tokenize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Updated,
    NoNewMessages,
}

/// Result of one incremental update run.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub session_id: String,
    pub status: UpdateStatus,
    pub messages_added: usize,
    pub postings_added: usize,
    pub new_terms: usize,
    pub last_msg_idx: i64,
    pub time_ms: f64,
}

impl UpdateOutcome {
    pub fn per_message_ms(&self) -> f64 {
        if self.messages_added == 0 {
            0.0
        } else {
            self.time_ms / self.messages_added as f64
        }
    }
}

/// Incrementally fold a session's new messages into the inverted index.
///
/// Consults the session's `last_msg_idx` (default -1), reads only lines
/// with a greater ordinal, appends their postings, and persists atomically.
/// Re-running with no new messages is a no-op that never rewrites posting
/// contents. The whole read-modify-write cycle happens under the exclusive
/// file lock.
pub fn update_index(
    paths: &MemoryPaths,
    session_id: &str,
    transcript: &Path,
    lock_timeout: Duration,
) -> Result<UpdateOutcome> {
    let start = Instant::now();
    paths.ensure_dir()?;
    let _lock = IndexLock::acquire(&paths.index_lock(), lock_timeout)?;

    let index_path = paths.inverted_index();
    let mut index = load_index(&index_path)?;
    let last_idx = index.last_msg_idx(session_id);

    let mut reader = TranscriptReader::open(transcript, last_idx)?;
    let fallback_ts = file_mtime_utc(transcript).unwrap_or_else(Utc::now);

    let mut messages_added = 0usize;
    let mut postings_added = 0usize;
    let mut new_terms = 0usize;

    while let Some(msg) = reader.next_message()? {
        let tokens = tokenize(&msg.payload.index_text());
        for token in &tokens {
            if !index.terms.contains_key(token) {
                new_terms += 1;
            }
        }
        let ts = msg.timestamp.unwrap_or(fallback_ts).to_rfc3339();
        postings_added += index.add_message(session_id, msg.msg_idx, &ts, &tokens);
        messages_added += 1;
    }

    if messages_added == 0 {
        tracing::debug!("no new messages for session {session_id}");
        return Ok(UpdateOutcome {
            session_id: session_id.to_string(),
            status: UpdateStatus::NoNewMessages,
            messages_added: 0,
            postings_added: 0,
            new_terms: 0,
            last_msg_idx: last_idx,
            time_ms: elapsed_ms(start),
        });
    }

    let now = Utc::now().to_rfc3339();
    if let Some(meta) = index.sessions.get_mut(session_id) {
        meta.indexed_at = now.clone();
    }
    index.refresh_totals();
    index.last_updated = now;
    save_atomic(&index_path, &index)?;

    let outcome = UpdateOutcome {
        session_id: session_id.to_string(),
        status: UpdateStatus::Updated,
        messages_added,
        postings_added,
        new_terms,
        last_msg_idx: index.last_msg_idx(session_id),
        time_ms: elapsed_ms(start),
    };
    tracing::info!(
        "indexed {} messages ({} postings, {} new terms) for {} in {:.1}ms",
        outcome.messages_added,
        outcome.postings_added,
        outcome.new_terms,
        session_id,
        outcome.time_ms
    );
    Ok(outcome)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::load_index;
    use std::io::Write;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, std::path::PathBuf, MemoryPaths) {
        let tmp = TempDir::new().unwrap();
        let transcript = tmp.path().join("sess-a.jsonl");
        let paths = MemoryPaths::new(tmp.path().join("memory"));
        (tmp, transcript, paths)
    }

    fn append(path: &Path, line: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        writeln!(f, "{line}").unwrap();
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn test_incremental_append() {
        let (_tmp, transcript, paths) = fixture();
        append(
            &transcript,
            r#"{"type":"message","timestamp":"2026-01-05T10:00:00Z","message":{"role":"user","content":"Glicko-2 rating system for ChessRT leaderboard"}}"#,
        );

        let first = update_index(&paths, "sess-a", &transcript, TIMEOUT).unwrap();
        assert_eq!(first.status, UpdateStatus::Updated);
        assert_eq!(first.messages_added, 1);
        assert_eq!(first.last_msg_idx, 0);

        append(
            &transcript,
            r#"{"type":"message","timestamp":"2026-01-05T10:05:00Z","message":{"role":"assistant","content":"Discussed containerd runtime for wlxc"}}"#,
        );

        let second = update_index(&paths, "sess-a", &transcript, TIMEOUT).unwrap();
        assert_eq!(second.status, UpdateStatus::Updated);
        assert_eq!(second.messages_added, 1);
        assert_eq!(second.last_msg_idx, 1);

        let index = load_index(&paths.inverted_index()).unwrap();
        for term in ["containerd", "runtime", "wlxc"] {
            assert_eq!(index.terms[term].len(), 1, "term {term}");
            assert_eq!(index.terms[term][0].msg_idx, 1);
        }
        assert_eq!(index.sessions["sess-a"].last_msg_idx, 1);
        assert_eq!(index.sessions["sess-a"].message_count, 2);
        assert_eq!(index.total_messages, 2);
    }

    #[test]
    fn test_rerun_is_noop() {
        let (_tmp, transcript, paths) = fixture();
        append(
            &transcript,
            r#"{"type":"message","message":{"role":"user","content":"stable content here"}}"#,
        );

        update_index(&paths, "sess-a", &transcript, TIMEOUT).unwrap();
        let before = std::fs::read_to_string(paths.inverted_index()).unwrap();

        let rerun = update_index(&paths, "sess-a", &transcript, TIMEOUT).unwrap();
        assert_eq!(rerun.status, UpdateStatus::NoNewMessages);
        assert_eq!(rerun.postings_added, 0);

        // Posting contents untouched (the file wasn't even rewritten)
        let after = std::fs::read_to_string(paths.inverted_index()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_counters_never_decrease() {
        let (_tmp, transcript, paths) = fixture();
        append(
            &transcript,
            r#"{"type":"message","message":{"role":"user","content":"first message body"}}"#,
        );
        update_index(&paths, "sess-a", &transcript, TIMEOUT).unwrap();
        let idx1 = load_index(&paths.inverted_index()).unwrap();

        append(
            &transcript,
            r#"{"type":"message","message":{"role":"user","content":"second message body"}}"#,
        );
        update_index(&paths, "sess-a", &transcript, TIMEOUT).unwrap();
        let idx2 = load_index(&paths.inverted_index()).unwrap();

        assert!(idx2.sessions["sess-a"].last_msg_idx >= idx1.sessions["sess-a"].last_msg_idx);
        assert!(idx2.total_messages >= idx1.total_messages);
        assert!(idx2.total_terms >= idx1.total_terms);
    }

    #[test]
    fn test_missing_transcript_is_unreadable() {
        let (_tmp, transcript, paths) = fixture();
        let err = update_index(&paths, "ghost", &transcript, TIMEOUT).unwrap_err();
        assert_eq!(err.kind(), "TranscriptUnreadable");
    }

    #[test]
    fn test_single_posting_token_round_trips() {
        let (_tmp, transcript, paths) = fixture();
        append(
            &transcript,
            r#"{"type":"message","message":{"role":"user","content":"zyzzyva sighting"}}"#,
        );
        update_index(&paths, "sess-a", &transcript, TIMEOUT).unwrap();

        let index = load_index(&paths.inverted_index()).unwrap();
        assert_eq!(index.terms["zyzzyva"].len(), 1);
    }
}
