use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use crate::config::RefreshConfig;
use crate::error::{EngineError, Result};
use crate::index::update::{update_index, UpdateOutcome, UpdateStatus};
use crate::index::{save_atomic, MemoryPaths};

/// Worker loop poll interval.
const TICK: Duration = Duration::from_millis(25);

// ---------------------------------------------------------------------------
// Timing knobs
// ---------------------------------------------------------------------------

/// Controller timings as durations, so tests can run at millisecond scale.
#[derive(Debug, Clone)]
pub struct RefreshTiming {
    pub debounce: Duration,
    pub cooldown: Duration,
    pub queue_capacity: usize,
    pub indexer_timeout: Duration,
}

impl From<&RefreshConfig> for RefreshTiming {
    fn from(cfg: &RefreshConfig) -> Self {
        Self {
            debounce: Duration::from_secs(cfg.debounce_secs),
            cooldown: Duration::from_secs(cfg.cooldown_secs),
            queue_capacity: cfg.queue_capacity,
            indexer_timeout: Duration::from_secs(cfg.indexer_timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted state (cooldowns must survive short-lived hook processes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshState {
    /// Per-session last successful update, Unix seconds.
    #[serde(rename = "lastUpdates", default)]
    pub last_updates: HashMap<String, f64>,
    /// Last polled-mode indexer run, Unix seconds.
    #[serde(rename = "lastRun", default)]
    pub last_run: f64,
    /// Sessions-directory mtime observed at that run, Unix seconds.
    #[serde(rename = "lastSessionsMtime", default)]
    pub last_sessions_mtime: f64,
}

impl RefreshState {
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_atomic(path, self)
    }

    pub fn in_cooldown(&self, session_id: &str, cooldown: Duration, now_epoch: f64) -> bool {
        let last = self.last_updates.get(session_id).copied().unwrap_or(0.0);
        now_epoch - last < cooldown.as_secs_f64()
    }

    pub fn record_update(&mut self, session_id: &str, now_epoch: f64) {
        self.last_updates.insert(session_id.to_string(), now_epoch);
    }
}

fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// One-shot handling (hook CLI entry)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum HookOutcome {
    Updated(UpdateOutcome),
    NoNewMessages(UpdateOutcome),
    Cooldown { session_id: String },
}

/// Handle one transcript-update event in a short-lived process: consult the
/// persisted cooldown, run the incremental updater, record the run.
/// `immediate` bypasses the cooldown.
pub fn handle_transcript_update(
    paths: &MemoryPaths,
    timing: &RefreshTiming,
    lock_timeout: Duration,
    session_id: &str,
    file_path: &Path,
    immediate: bool,
) -> Result<HookOutcome> {
    if !file_path.exists() {
        return Err(EngineError::TranscriptUnreadable {
            path: file_path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "transcript not found"),
        });
    }

    let state_path = paths.refresh_state();
    let mut state = RefreshState::load(&state_path);
    let now = epoch_now();

    if !immediate && state.in_cooldown(session_id, timing.cooldown, now) {
        tracing::debug!("session {session_id} in cooldown, skipping update");
        return Ok(HookOutcome::Cooldown {
            session_id: session_id.to_string(),
        });
    }

    let outcome = update_index(paths, session_id, file_path, lock_timeout)?;
    state.record_update(session_id, epoch_now());
    if let Err(e) = state.save(&state_path) {
        tracing::warn!("failed to persist refresh state: {e}");
    }

    Ok(match outcome.status {
        UpdateStatus::Updated => HookOutcome::Updated(outcome),
        UpdateStatus::NoNewMessages => HookOutcome::NoNewMessages(outcome),
    })
}

// ---------------------------------------------------------------------------
// Polled mode (tool-event hooks without transcript payloads)
// ---------------------------------------------------------------------------

/// Check the sessions directory mtime and re-run the session indexer when
/// it moved forward and both debounce and cooldown have elapsed. Returns
/// whether the indexer ran.
pub fn poll_sessions_dir(
    paths: &MemoryPaths,
    sessions_dir: &Path,
    timing: &RefreshTiming,
) -> Result<bool> {
    let state_path = paths.refresh_state();
    let mut state = RefreshState::load(&state_path);
    let now = epoch_now();

    if now - state.last_run < timing.debounce.as_secs_f64() {
        return Ok(false);
    }

    let dir_mtime = match std::fs::metadata(sessions_dir).and_then(|m| m.modified()) {
        Ok(mtime) => mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0),
        Err(_) => return Ok(false),
    };

    if dir_mtime <= state.last_sessions_mtime {
        return Ok(false);
    }
    if now - state.last_run < timing.cooldown.as_secs_f64() {
        return Ok(false);
    }

    crate::index::sessions::build_sessions_index(sessions_dir, paths)?;

    state.last_run = now;
    state.last_sessions_mtime = dir_mtime;
    state.save(&state_path)?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// In-process controller
// ---------------------------------------------------------------------------

/// The work the controller runs per accepted update.
pub type UpdateFn = Arc<dyn Fn(&str, &Path) -> Result<()> + Send + Sync>;

struct Pending {
    path: PathBuf,
    queued_at: Instant,
    due_at: Instant,
}

struct Event {
    session_id: String,
    path: PathBuf,
}

/// Debounced, cooled-down, serialized index refresher.
///
/// Per session the lifecycle is Idle → Debouncing (5 s, reset per event) →
/// possibly Cooling (reschedule until 30 s since the last run) → Running.
/// A single worker loop drains a bounded pending map, so updates for one
/// session apply in the order they were accepted and never overlap.
pub struct RefreshController {
    tx: mpsc::UnboundedSender<Event>,
    cancel: Arc<AtomicBool>,
    timing: RefreshTiming,
    update: UpdateFn,
    worker: tokio::task::JoinHandle<()>,
}

impl RefreshController {
    pub fn spawn(timing: RefreshTiming, update: UpdateFn) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(worker_loop(
            rx,
            cancel.clone(),
            timing.clone(),
            update.clone(),
        ));

        Self {
            tx,
            cancel,
            timing,
            update,
            worker,
        }
    }

    /// Accept a transcript-update trigger. Non-immediate triggers debounce
    /// and respect the per-session cooldown; `immediate` runs synchronously
    /// on the caller.
    pub fn on_transcript_update(
        &self,
        session_id: &str,
        path: &Path,
        immediate: bool,
    ) -> Result<()> {
        if immediate {
            return (self.update)(session_id, path);
        }
        self.tx
            .send(Event {
                session_id: session_id.to_string(),
                path: path.to_path_buf(),
            })
            .map_err(|_| {
                EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "refresh controller stopped",
                ))
            })
    }

    pub fn timing(&self) -> &RefreshTiming {
        &self.timing
    }

    pub async fn shutdown(self) {
        self.cancel.store(true, Ordering::Relaxed);
        let _ = self.worker.await;
    }
}

async fn worker_loop(
    mut rx: mpsc::UnboundedReceiver<Event>,
    cancel: Arc<AtomicBool>,
    timing: RefreshTiming,
    update: UpdateFn,
) {
    let mut pending: HashMap<String, Pending> = HashMap::new();
    let mut last_run: HashMap<String, Instant> = HashMap::new();

    loop {
        if cancel.load(Ordering::Relaxed) {
            tracing::debug!("refresh controller cancelled");
            return;
        }

        // Accept new events: reset the debounce window, keep the original
        // queue position.
        while let Ok(event) = rx.try_recv() {
            let now = Instant::now();
            match pending.get_mut(&event.session_id) {
                Some(entry) => {
                    entry.path = event.path;
                    entry.due_at = now + timing.debounce;
                }
                None => {
                    pending.insert(
                        event.session_id,
                        Pending {
                            path: event.path,
                            queued_at: now,
                            due_at: now + timing.debounce,
                        },
                    );
                }
            }

            // Bounded queue: overflow drops the oldest pending entry
            if pending.len() > timing.queue_capacity {
                if let Some(oldest) = pending
                    .iter()
                    .min_by_key(|(_, p)| p.queued_at)
                    .map(|(id, _)| id.clone())
                {
                    tracing::warn!("refresh queue full, dropping pending update for {oldest}");
                    pending.remove(&oldest);
                }
            }
        }

        // Fire due entries in acceptance order
        let now = Instant::now();
        let mut due: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.due_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        due.sort_by_key(|id| pending[id].queued_at);

        for session_id in due {
            // Cooldown pushes the entry out instead of running it
            if let Some(ran_at) = last_run.get(&session_id) {
                let since = now.saturating_duration_since(*ran_at);
                if since < timing.cooldown {
                    if let Some(entry) = pending.get_mut(&session_id) {
                        entry.due_at = *ran_at + timing.cooldown;
                    }
                    continue;
                }
            }

            let Some(entry) = pending.remove(&session_id) else {
                continue;
            };

            let update = update.clone();
            let sid = session_id.clone();
            let path = entry.path.clone();
            let work = tokio::task::spawn_blocking(move || update(&sid, &path));

            match tokio::time::timeout(timing.indexer_timeout, work).await {
                Ok(Ok(Ok(()))) => {
                    last_run.insert(session_id, Instant::now());
                }
                Ok(Ok(Err(e))) => {
                    tracing::warn!("refresh update failed for {session_id}: {e}");
                    last_run.insert(session_id, Instant::now());
                }
                Ok(Err(join_err)) => {
                    tracing::error!("refresh worker panicked for {session_id}: {join_err}");
                }
                Err(_) => {
                    tracing::warn!(
                        "refresh update for {session_id} exceeded {:?}",
                        timing.indexer_timeout
                    );
                }
            }
        }

        tokio::time::sleep(TICK).await;
    }
}
