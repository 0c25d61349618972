pub mod build;
pub mod jsonl;
pub mod lock;
pub mod sessions;
pub mod update;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// On-disk layout
// ---------------------------------------------------------------------------

/// Well-known file locations under the memory directory.
#[derive(Debug, Clone)]
pub struct MemoryPaths {
    memory_dir: PathBuf,
}

impl MemoryPaths {
    pub fn new(memory_dir: impl Into<PathBuf>) -> Self {
        Self {
            memory_dir: memory_dir.into(),
        }
    }

    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }

    pub fn inverted_index(&self) -> PathBuf {
        self.memory_dir.join("inverted-index.json")
    }

    pub fn sessions_index(&self) -> PathBuf {
        self.memory_dir.join("sessions-index.json")
    }

    pub fn index_lock(&self) -> PathBuf {
        self.memory_dir.join(".inverted-index.lock")
    }

    pub fn usage_log(&self) -> PathBuf {
        self.memory_dir.join("usage.log")
    }

    pub fn refresh_state(&self) -> PathBuf {
        self.memory_dir.join(".refresh-state.json")
    }

    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.memory_dir)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Inverted index (wire layout shared with interoperating tools)
// ---------------------------------------------------------------------------

/// One occurrence of a token in one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub session: String,
    pub msg_idx: u64,
    #[serde(default)]
    pub timestamp: String,
}

/// Per-session bookkeeping inside the inverted index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Highest message ordinal indexed so far; -1 when nothing is indexed.
    #[serde(default = "default_last_msg_idx")]
    pub last_msg_idx: i64,
    #[serde(default)]
    pub indexed_at: String,
    #[serde(default)]
    pub term_count: u64,
    #[serde(default)]
    pub message_count: u64,
}

fn default_last_msg_idx() -> i64 {
    -1
}

impl Default for SessionMeta {
    fn default() -> Self {
        Self {
            last_msg_idx: -1,
            indexed_at: String::new(),
            term_count: 0,
            message_count: 0,
        }
    }
}

/// The persistent term → posting-list map. `BTreeMap` keeps serialization
/// deterministic: two builds over identical transcripts produce identical
/// bytes modulo `last_updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvertedIndex {
    pub version: u32,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub total_terms: u64,
    #[serde(default)]
    pub total_messages: u64,
    #[serde(default)]
    pub terms: BTreeMap<String, Vec<Posting>>,
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionMeta>,
}

impl InvertedIndex {
    pub fn empty() -> Self {
        Self {
            version: crate::INDEX_VERSION,
            last_updated: String::new(),
            total_terms: 0,
            total_messages: 0,
            terms: BTreeMap::new(),
            sessions: BTreeMap::new(),
        }
    }

    /// Highest indexed message ordinal for a session, -1 if never indexed.
    pub fn last_msg_idx(&self, session_id: &str) -> i64 {
        self.sessions
            .get(session_id)
            .map(|m| m.last_msg_idx)
            .unwrap_or(-1)
    }

    /// Append one posting per token for a single message and update the
    /// session counters. Returns the number of postings appended.
    ///
    /// Callers guarantee `msg_idx` exceeds the session's `last_msg_idx`,
    /// which is what keeps `(session, msg_idx)` unique per term.
    pub fn add_message(
        &mut self,
        session_id: &str,
        msg_idx: u64,
        timestamp: &str,
        tokens: &[String],
    ) -> usize {
        let mut added = 0;
        for token in tokens {
            let list = self.terms.entry(token.clone()).or_default();
            list.push(Posting {
                session: session_id.to_string(),
                msg_idx,
                timestamp: timestamp.to_string(),
            });
            added += 1;
        }

        let meta = self.sessions.entry(session_id.to_string()).or_default();
        meta.last_msg_idx = meta.last_msg_idx.max(msg_idx as i64);
        meta.message_count += 1;
        meta.term_count += added as u64;
        added
    }

    /// Recompute the derived totals from the maps.
    pub fn refresh_totals(&mut self) {
        self.total_terms = self.terms.len() as u64;
        self.total_messages = self.sessions.values().map(|m| m.message_count).sum();
    }

    /// Session IDs holding at least one posting for `token`.
    pub fn sessions_for_token(&self, token: &str) -> Option<std::collections::HashSet<&str>> {
        self.terms
            .get(token)
            .map(|list| list.iter().map(|p| p.session.as_str()).collect())
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Read the inverted index. A missing file is an empty index; a file that
/// exists but does not parse is `IndexCorrupt`.
pub fn load_index(path: &Path) -> Result<InvertedIndex> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(InvertedIndex::empty()),
        Err(e) => return Err(EngineError::Io(e)),
    };

    serde_json::from_str(&data).map_err(|e| EngineError::IndexCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Persist via write-temp-then-rename so readers never observe a partial
/// file. The temp file lives next to the target (same filesystem).
pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value).map_err(|e| EngineError::IndexCorrupt {
        path: path.to_path_buf(),
        reason: format!("serialization failed: {e}"),
    })?;
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
