use std::path::PathBuf;

/// Error taxonomy for the retrieval engine.
///
/// Each variant maps to a stable `kind` discriminator so callers (and the
/// CLI's JSON output) can branch on error class without matching Rust types.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The inverted-index file does not exist and auto-build was disabled.
    #[error("inverted index not found at {}", .path.display())]
    IndexMissing { path: PathBuf },

    /// The inverted-index file exists but could not be parsed.
    #[error("inverted index at {} is corrupt: {reason}", .path.display())]
    IndexCorrupt { path: PathBuf, reason: String },

    /// The exclusive index lock could not be acquired within the timeout.
    #[error("could not acquire index lock within {timeout_secs}s")]
    LockTimeout { timeout_secs: u64 },

    /// A transcript file could not be opened or read at all.
    #[error("transcript unreadable: {}: {source}", .path.display())]
    TranscriptUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A transcript file was readable but contained no parseable records.
    /// Individual bad lines are skipped silently; this fires only when the
    /// whole file is garbage.
    #[error("transcript malformed: {}", .path.display())]
    TranscriptMalformed { path: PathBuf },

    /// Configuration file was present but invalid.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable discriminator string for structured error reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::IndexMissing { .. } => "IndexMissing",
            EngineError::IndexCorrupt { .. } => "IndexCorrupt",
            EngineError::LockTimeout { .. } => "LockTimeout",
            EngineError::TranscriptUnreadable { .. } => "TranscriptUnreadable",
            EngineError::TranscriptMalformed { .. } => "TranscriptMalformed",
            EngineError::ConfigInvalid { .. } => "ConfigInvalid",
            EngineError::Io(_) => "Io",
        }
    }

    /// Whether the query path may recover by falling back to a full scan.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::IndexMissing { .. } | EngineError::TranscriptUnreadable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        let err = EngineError::LockTimeout { timeout_secs: 30 };
        assert_eq!(err.kind(), "LockTimeout");

        let err = EngineError::IndexMissing {
            path: PathBuf::from("/tmp/x.json"),
        };
        assert_eq!(err.kind(), "IndexMissing");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_corrupt_is_not_recoverable() {
        let err = EngineError::IndexCorrupt {
            path: PathBuf::from("/tmp/x.json"),
            reason: "trailing garbage".into(),
        };
        assert!(!err.is_recoverable());
    }
}
