use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{EngineError, Result};

/// Poll interval while waiting for a contended lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive advisory whole-file lock guarding the inverted index.
///
/// The updater holds this for its entire read-modify-write cycle. Competing
/// updaters block (polling) up to the timeout, then fail with `LockTimeout`.
/// The lock releases on drop; the lock file itself is removed best-effort.
#[derive(Debug)]
pub struct IndexLock {
    file: File,
    path: PathBuf,
}

impl IndexLock {
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let start = Instant::now();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        loop {
            // Re-open each attempt: a racing holder may unlink the file on
            // release, and flock follows the open file description.
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(_) => {
                    if start.elapsed() >= timeout {
                        return Err(EngineError::LockTimeout {
                            timeout_secs: timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
            }
        }
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}
