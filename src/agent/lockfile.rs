//! PID lock file enforcing a single agent per data directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::platform::{self, Liveness, SystemLiveness};

/// Publishing attempts before giving up on a contended lock
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("agent already running with PID {pid}")]
    AlreadyRunning { pid: u32 },

    #[error("lock file belongs to PID {owner}, not {pid}")]
    NotOwner { owner: u32, pid: u32 },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LockError::Io {
            context: context.into(),
            source,
        }
    }
}

/// What a lock file currently says
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    Absent,
    Malformed,
    Pid(u32),
}

/// A PID-based lock file
pub struct LockFile {
    path: PathBuf,
    pid: u32,
    liveness: Arc<dyn Liveness>,
}

impl LockFile {
    /// Lock at `path` owned by the current process
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_liveness(path, std::process::id(), Arc::new(SystemLiveness))
    }

    /// Lock with an explicit owner PID and liveness check
    pub fn with_liveness(path: impl Into<PathBuf>, pid: u32, liveness: Arc<dyn Liveness>) -> Self {
        Self {
            path: path.into(),
            pid,
            liveness,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Take the lock, clearing a stale record left by a dead process
    pub fn acquire(&self) -> Result<(), LockError> {
        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            match read_record(&self.path)? {
                Record::Absent => {}
                Record::Malformed => {
                    tracing::warn!("Removing malformed lock file {}", self.path.display());
                    self.remove_stale(Record::Malformed)?;
                }
                Record::Pid(pid) if self.liveness.is_alive(pid) => {
                    return Err(LockError::AlreadyRunning { pid });
                }
                Record::Pid(pid) => {
                    tracing::warn!(
                        "Removing stale lock file {} left by PID {}",
                        self.path.display(),
                        pid
                    );
                    self.remove_stale(Record::Pid(pid))?;
                }
            }

            if self.publish()? {
                tracing::debug!("Lock {} acquired by PID {}", self.path.display(), self.pid);
                return Ok(());
            }

            tracing::debug!(
                "Lock {} appeared while acquiring (attempt {}/{})",
                self.path.display(),
                attempt,
                MAX_ACQUIRE_ATTEMPTS
            );
        }

        match read_record(&self.path)? {
            Record::Pid(pid) => Err(LockError::AlreadyRunning { pid }),
            _ => Err(LockError::io(
                "acquire lock file",
                std::io::Error::new(ErrorKind::WouldBlock, "lock file is contended"),
            )),
        }
    }

    /// Drop the lock if, and only if, it records our PID
    pub fn release(&self) -> Result<(), LockError> {
        match read_record(&self.path)? {
            Record::Absent => Ok(()),
            // Nobody can own a record without a valid PID, and acquire would
            // replace it anyway
            Record::Malformed => remove_if_present(&self.path),
            Record::Pid(owner) if owner != self.pid => Err(LockError::NotOwner {
                owner,
                pid: self.pid,
            }),
            Record::Pid(_) => {
                remove_if_present(&self.path)?;
                tracing::debug!("Lock {} released", self.path.display());
                Ok(())
            }
        }
    }

    /// Write our record to a temp file and hard-link it into place
    ///
    /// Returns `false` when another process published first.
    fn publish(&self) -> Result<bool, LockError> {
        if let Some(dir) = self.path.parent() {
            platform::ensure_private_directory(dir)
                .map_err(|e| LockError::io("create lock directory", std::io::Error::other(e)))?;
        }

        let temp = platform::sibling_temp_path(&self.path);
        platform::write_synced(&temp, format!("{}\n", self.pid).as_bytes())
            .map_err(|e| LockError::io("write lock file", std::io::Error::other(e)))?;

        let linked = std::fs::hard_link(&temp, &self.path);
        let _ = std::fs::remove_file(&temp);

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(LockError::io("publish lock file", e)),
        }
    }

    /// Move the lock file aside and delete it only if it still says `seen`
    ///
    /// Between reading a stale record and removing it, another starter may
    /// have replaced it with a live lock. The rename takes whatever is there
    /// out of place atomically; a record that no longer matches is linked
    /// back instead of deleted.
    fn remove_stale(&self, seen: Record) -> Result<(), LockError> {
        let tomb = tomb_path(&self.path);

        match std::fs::rename(&self.path, &tomb) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(LockError::io("move stale lock file", e)),
        }

        let found = read_record(&tomb);
        if !matches!(found, Ok(ref record) if *record == seen) {
            tracing::debug!(
                "Lock {} changed while clearing it ({:?}), restoring",
                self.path.display(),
                found
            );
            match std::fs::hard_link(&tomb, &self.path) {
                Ok(()) => {}
                // A third starter published meanwhile; its record stands
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    let _ = std::fs::remove_file(&tomb);
                    return Err(LockError::io("restore lock file", e));
                }
            }
        }

        remove_if_present(&tomb)
    }
}

/// Unique name a stale lock file is moved to before deletion
fn tomb_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    path.with_file_name(format!(".{}.{}.stale", file_name, std::process::id()))
}

/// PID of the live process holding the lock at `path`, if any
pub fn holder(path: &Path, liveness: &dyn Liveness) -> Option<u32> {
    match read_record(path) {
        Ok(Record::Pid(pid)) if liveness.is_alive(pid) => Some(pid),
        _ => None,
    }
}

/// Parse a lock file body: a decimal, non-zero PID
fn parse_pid(content: &str) -> Option<u32> {
    content.trim().parse::<u32>().ok().filter(|pid| *pid != 0)
}

fn read_record(path: &Path) -> Result<Record, LockError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(parse_pid(&content).map_or(Record::Malformed, Record::Pid)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Record::Absent),
        Err(e) if e.kind() == ErrorKind::InvalidData => Ok(Record::Malformed),
        Err(e) => Err(LockError::io("read lock file", e)),
    }
}

fn remove_if_present(path: &Path) -> Result<(), LockError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LockError::io("remove lock file", e)),
    }
}
