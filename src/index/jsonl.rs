use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::models::{MessagePayload, TranscriptRecord};

const BUF_SIZE: usize = 64 * 1024; // 64KB

/// A user/assistant message pulled out of a transcript, tagged with the
/// 0-based line ordinal that identifies it in the inverted index.
#[derive(Debug)]
pub struct TranscriptMessage {
    pub msg_idx: u64,
    pub payload: MessagePayload,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Streaming transcript reader keyed by line ordinal.
///
/// Lines that fail to parse are counted and skipped; records that are not
/// user/assistant messages are skipped silently. The ordinal counts every
/// line (parseable or not) so it stays stable as the file grows.
#[derive(Debug)]
pub struct TranscriptReader {
    reader: BufReader<File>,
    next_ordinal: u64,
    skip_through: i64,
    path: PathBuf,
    pub parse_errors: usize,
}

impl TranscriptReader {
    /// Open a transcript. `after` is the last already-indexed ordinal; pass
    /// -1 to read from the beginning.
    pub fn open(path: &Path, after: i64) -> Result<Self> {
        let file = File::open(path).map_err(|e| EngineError::TranscriptUnreadable {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(Self {
            reader: BufReader::with_capacity(BUF_SIZE, file),
            next_ordinal: 0,
            skip_through: after,
            path: path.to_path_buf(),
            parse_errors: 0,
        })
    }

    /// Next message record at an ordinal greater than `after`. Returns None
    /// at EOF.
    pub fn next_message(&mut self) -> Result<Option<TranscriptMessage>> {
        let mut buf = String::new();
        loop {
            buf.clear();
            let bytes_read =
                self.reader
                    .read_line(&mut buf)
                    .map_err(|e| EngineError::TranscriptUnreadable {
                        path: self.path.clone(),
                        source: e,
                    })?;
            if bytes_read == 0 {
                return Ok(None); // EOF
            }

            let ordinal = self.next_ordinal;
            self.next_ordinal += 1;

            if (ordinal as i64) <= self.skip_through {
                continue; // Already indexed
            }

            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            let record: TranscriptRecord = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(_) => {
                    self.parse_errors += 1;
                    continue;
                }
            };

            if !record.is_message() {
                continue;
            }

            let timestamp = record.timestamp.as_ref().and_then(|t| t.to_utc());
            let payload = record.message.expect("is_message checked payload");

            return Ok(Some(TranscriptMessage {
                msg_idx: ordinal,
                payload,
                timestamp,
            }));
        }
    }
}

/// Transcript file mtime as UTC, used when records carry no timestamp.
pub fn file_mtime_utc(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}
