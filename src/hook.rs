use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::index::MemoryPaths;
use crate::refresh::{handle_transcript_update, HookOutcome, RefreshTiming};

/// The one event type the engine consumes.
pub const TRANSCRIPT_UPDATE_EVENT: &str = "session:transcript:update";

/// Payload of `session:transcript:update`. Producers disagree about casing,
/// so both spellings of every field are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptUpdatePayload {
    #[serde(alias = "sessionId")]
    pub session_id: String,
    #[serde(alias = "filePath", alias = "path")]
    pub file_path: PathBuf,
    #[serde(default)]
    pub immediate: bool,
}

/// Dispatch an external event to the refresh machinery. Unknown event
/// types and malformed payloads are configuration errors.
pub fn handle_event(
    paths: &MemoryPaths,
    timing: &RefreshTiming,
    lock_timeout: Duration,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<HookOutcome> {
    if event_type != TRANSCRIPT_UPDATE_EVENT {
        return Err(EngineError::ConfigInvalid {
            reason: format!("unknown event type: {event_type}"),
        });
    }

    let payload: TranscriptUpdatePayload =
        serde_json::from_value(payload.clone()).map_err(|e| EngineError::ConfigInvalid {
            reason: format!("bad {TRANSCRIPT_UPDATE_EVENT} payload: {e}"),
        })?;

    dispatch(paths, timing, lock_timeout, &payload)
}

pub fn dispatch(
    paths: &MemoryPaths,
    timing: &RefreshTiming,
    lock_timeout: Duration,
    payload: &TranscriptUpdatePayload,
) -> Result<HookOutcome> {
    if payload.session_id.is_empty() {
        return Err(EngineError::ConfigInvalid {
            reason: "payload missing session_id".to_string(),
        });
    }
    handle_transcript_update(
        paths,
        timing,
        lock_timeout,
        &payload.session_id,
        Path::new(&payload.file_path),
        payload.immediate,
    )
}
