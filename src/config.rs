use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Top-level configuration loaded from `hindsight.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HindsightConfig {
    /// Directory holding the index files and usage log (supports `~` expansion).
    pub memory_dir: String,
    /// Directory holding session transcripts, one `.jsonl` per session
    /// (supports `~` expansion).
    pub sessions_dir: String,
    /// Default log level when `RUST_LOG` is not set.
    pub log_level: String,

    pub index: IndexConfig,
    pub search: SearchConfig,
    pub refresh: RefreshConfig,
}

impl Default for HindsightConfig {
    fn default() -> Self {
        Self {
            memory_dir: "~/.hindsight".to_string(),
            sessions_dir: "~/.hindsight/sessions".to_string(),
            log_level: "info".to_string(),
            index: IndexConfig::default(),
            search: SearchConfig::default(),
            refresh: RefreshConfig::default(),
        }
    }
}

impl HindsightConfig {
    /// Resolve the memory directory, expanding `~`.
    pub fn resolved_memory_dir(&self) -> PathBuf {
        expand_tilde(&self.memory_dir)
    }

    /// Resolve the sessions directory, expanding `~`.
    pub fn resolved_sessions_dir(&self) -> PathBuf {
        expand_tilde(&self.sessions_dir)
    }

    pub fn resolved_log_level(&self) -> &str {
        &self.log_level
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Seconds to wait for the exclusive index lock before giving up.
    pub lock_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,
    /// How many most-recent sessions the fallback scan covers when no
    /// temporal filter narrows the set.
    pub recent_session_limit: usize,
    /// Index age (seconds) beyond which auto-index triggers a rebuild.
    pub stale_after_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            recent_session_limit: 30,
            stale_after_secs: 2 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Wait for rapid updates to settle before indexing.
    pub debounce_secs: u64,
    /// Minimum time between updates for the same session.
    pub cooldown_secs: u64,
    /// Pending-update queue bound; overflow drops the oldest entry.
    pub queue_capacity: usize,
    /// Upper bound on a single indexer run.
    pub indexer_timeout_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 5,
            cooldown_secs: 30,
            queue_capacity: 100,
            indexer_timeout_secs: 60,
        }
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Expand `~` or a leading `~/` to the user's home directory. Anything else
/// (including `~user` forms) passes through untouched.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return home_dir();
    }
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}

/// Default config file location, `~/.hindsight/hindsight.toml`.
pub fn default_config_path() -> PathBuf {
    home_dir().join(".hindsight").join("hindsight.toml")
}

/// Load configuration.
///
/// An explicitly named file must exist and parse. With no path given, the
/// default location is consulted and its absence simply means defaults;
/// any other read failure is still reported.
pub fn load_config(path: Option<&Path>) -> Result<HindsightConfig> {
    let (config_path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path(), false),
    };

    let contents = match std::fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            return Ok(HindsightConfig::default());
        }
        Err(e) => {
            return Err(EngineError::ConfigInvalid {
                reason: format!("cannot read {}: {e}", config_path.display()),
            });
        }
    };

    toml::from_str(&contents).map_err(|e| EngineError::ConfigInvalid {
        reason: format!("{}: {e}", config_path.display()),
    })
}
