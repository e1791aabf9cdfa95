//! State directory locking
//!
//! The era counter and resource records are shared by every step, so only
//! one apply or delete may run against a state directory at a time. The
//! lock is an advisory `flock` on `<state_dir>/.eraflow.lock`. The holder
//! writes a small JSON record (pid, run id, time) into the file so that a
//! waiting run can say who it is waiting for.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Lock result type
pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {timeout:?} waiting for state lock {} (held by {})", .path.display(), describe(.holder))]
    Timeout {
        path: PathBuf,
        timeout: Duration,
        holder: Option<LockHolder>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Who currently holds a state lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub acquired_at: DateTime<Utc>,
}

impl std::fmt::Display for LockHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid {}", self.pid)?;
        if let Some(run_id) = &self.run_id {
            write!(f, ", run {}", run_id)?;
        }
        write!(f, ", since {}", self.acquired_at.to_rfc3339())
    }
}

fn describe(holder: &Option<LockHolder>) -> String {
    holder
        .as_ref()
        .map(|h| h.to_string())
        .unwrap_or_else(|| "unknown holder".to_string())
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONTENTION_WARN_AFTER: Duration = Duration::from_millis(500);

/// Exclusive lock on a state directory, held until dropped.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    #[cfg_attr(not(unix), allow(dead_code))]
    file: File,
    holder: LockHolder,
}

impl StateLock {
    /// Lock file name
    pub const LOCK_FILENAME: &'static str = ".eraflow.lock";

    /// Acquire the lock on `state_dir` for `run_id`, creating the directory
    /// if needed. Polls until the lock is free or `timeout` elapses.
    pub fn acquire(state_dir: &Path, timeout: Duration, run_id: Option<&str>) -> LockResult<Self> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(Self::LOCK_FILENAME);
        let deadline = Instant::now() + timeout;
        let started = Instant::now();
        let mut reported = false;

        let mut file = loop {
            if let Some(file) = try_lock(&path)? {
                break file;
            }
            if !reported && started.elapsed() >= CONTENTION_WARN_AFTER {
                warn!(
                    path = %path.display(),
                    holder = %describe(&read_holder(&path)),
                    "state lock is held by another run, waiting"
                );
                reported = true;
            }
            if Instant::now() >= deadline {
                return Err(LockError::Timeout {
                    holder: read_holder(&path),
                    path,
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let holder = LockHolder {
            pid: std::process::id(),
            run_id: run_id.map(str::to_string),
            acquired_at: Utc::now(),
        };
        record_holder(&mut file, &holder)?;
        debug!(
            path = %path.display(),
            waited_ms = started.elapsed().as_millis() as u64,
            "state lock acquired"
        );

        Ok(Self { path, file, holder })
    }

    /// Get the lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }
}

/// Holder recorded in the lock file at `path`, if readable.
pub fn read_holder(path: &Path) -> Option<LockHolder> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(contents.trim()).ok()
}

fn record_holder(file: &mut File, holder: &LockHolder) -> io::Result<()> {
    let json = serde_json::to_string(holder).map_err(io::Error::other)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(json.as_bytes())?;
    file.sync_data()
}

/// `Ok(None)` when someone else holds the lock.
#[cfg(unix)]
fn try_lock(path: &Path) -> io::Result<Option<File>> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    // No truncate here: the file carries the current holder's record.
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(path)?;

    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        return Ok(Some(file));
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(None)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_lock(path: &Path) -> io::Result<Option<File>> {
    match OpenOptions::new().read(true).write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e),
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let _ = self.file.set_len(0);
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = fs::remove_file(&self.path);
        }
    }
}
