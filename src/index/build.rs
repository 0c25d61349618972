use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::jsonl::{file_mtime_utc, TranscriptReader};
use super::lock::IndexLock;
use super::{save_atomic, InvertedIndex, MemoryPaths};
use crate::error::Result;
use crate::text::tokenize;

/// Report produced after a full index build.
#[derive(Debug, Default, Clone)]
pub struct BuildReport {
    pub sessions_indexed: usize,
    pub messages_indexed: usize,
    pub parse_errors: usize,
    pub unreadable_files: usize,
    pub total_terms: u64,
    pub total_postings: usize,
    pub elapsed_secs: f64,
}

impl std::fmt::Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Index build complete in {:.1}s", self.elapsed_secs)?;
        writeln!(f, "  Sessions:  {}", self.sessions_indexed)?;
        writeln!(
            f,
            "  Messages:  {} indexed, {} parse errors",
            self.messages_indexed, self.parse_errors
        )?;
        writeln!(
            f,
            "  Terms:     {} ({} postings)",
            self.total_terms, self.total_postings
        )?;
        if self.unreadable_files > 0 {
            writeln!(f, "  Unreadable: {} files skipped", self.unreadable_files)?;
        }
        Ok(())
    }
}

/// All `.jsonl` transcripts under the sessions directory, sorted by path so
/// builds are deterministic. A missing directory is an empty corpus.
pub fn transcript_files(sessions_dir: &Path) -> Result<Vec<PathBuf>> {
    let read_dir = match std::fs::read_dir(sessions_dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("sessions directory not found: {}", sessions_dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut files: Vec<PathBuf> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl")
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Full index build: scan every transcript, tokenize every message, write
/// the inverted index and the session summaries atomically.
///
/// Holds the exclusive index lock for the whole run; posting order is the
/// natural session-by-session, message-by-message order.
pub fn build_index(
    sessions_dir: &Path,
    paths: &MemoryPaths,
    lock_timeout: Duration,
) -> Result<BuildReport> {
    let start = Instant::now();
    paths.ensure_dir()?;
    let _lock = IndexLock::acquire(&paths.index_lock(), lock_timeout)?;

    tracing::info!(
        "building index: {} → {}",
        sessions_dir.display(),
        paths.inverted_index().display()
    );

    let mut index = InvertedIndex::empty();
    let mut report = BuildReport::default();
    let indexed_at = Utc::now().to_rfc3339();

    for path in transcript_files(sessions_dir)? {
        let session_id = match path.file_stem() {
            Some(stem) => stem.to_string_lossy().to_string(),
            None => continue,
        };

        // Every transcript gets a session entry, even an empty or
        // unreadable one (counters stay zero).
        index.sessions.entry(session_id.clone()).or_default();
        report.sessions_indexed += 1;

        let mut reader = match TranscriptReader::open(&path, -1) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("skipping unreadable transcript {}: {e}", path.display());
                report.unreadable_files += 1;
                continue;
            }
        };

        let fallback_ts = file_mtime_utc(&path).unwrap_or_else(Utc::now);
        loop {
            match reader.next_message() {
                Ok(Some(msg)) => {
                    let tokens = tokenize(&msg.payload.index_text());
                    let ts = msg.timestamp.unwrap_or(fallback_ts).to_rfc3339();
                    report.total_postings +=
                        index.add_message(&session_id, msg.msg_idx, &ts, &tokens);
                    report.messages_indexed += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("read error in {}: {e}", path.display());
                    report.unreadable_files += 1;
                    break;
                }
            }
        }
        report.parse_errors += reader.parse_errors;

        if let Some(meta) = index.sessions.get_mut(&session_id) {
            meta.indexed_at = indexed_at.clone();
        }
    }

    index.refresh_totals();
    index.last_updated = Utc::now().to_rfc3339();
    report.total_terms = index.total_terms;

    save_atomic(&paths.inverted_index(), &index)?;

    // Session summaries ride along with every full build so the two files
    // never drift apart.
    super::sessions::build_sessions_index(sessions_dir, paths)?;

    report.elapsed_secs = start.elapsed().as_secs_f64();
    tracing::info!(
        "index built: {} sessions, {} messages, {} terms in {:.1}s",
        report.sessions_indexed,
        report.messages_indexed,
        report.total_terms,
        report.elapsed_secs
    );

    Ok(report)
}
