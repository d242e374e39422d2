//! Advisory cross-process lock over the registry directory.

use crate::error::{EnvrunError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// File name of the lock file inside the registry directory.
pub const LOCK_FILE_NAME: &str = "proc.lock";

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How the registry lock is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// When false, acquisition yields a no-op lock that never blocks or fails
    pub enabled: bool,

    /// Maximum wait for a contended lock; `None` blocks until it is released
    pub timeout: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: None,
        }
    }
}

impl LockOptions {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            timeout: None,
        }
    }
}

/// Scoped exclusive lock on a registry directory.
///
/// The lock is released when the value is dropped. A lock obtained while locking
/// is disabled holds no file and releases nothing.
#[derive(Debug)]
pub struct RegistryLock {
    path: PathBuf,
    file: Option<File>,
}

impl RegistryLock {
    /// Acquire the lock for `dir`, blocking (or polling up to the timeout) on contention.
    pub fn acquire(dir: &Path, options: LockOptions) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);

        if !options.enabled {
            debug!(
                "file locking attempt ignored because locking is disabled - path: {}",
                dir.display()
            );
            return Ok(Self { path, file: None });
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| EnvrunError::lock(dir, e.to_string()))?;

        match options.timeout {
            None => FileExt::lock_exclusive(&file)
                .map_err(|e| EnvrunError::lock(dir, e.to_string()))?,
            Some(timeout) => wait_for_lock(&file, dir, timeout)?,
        }

        // Holder pid is diagnostic only.
        if let Err(e) = write_holder_pid(&mut file) {
            debug!("Could not record lock holder in {}: {}", path.display(), e);
        }

        debug!(path = %path.display(), "acquired registry lock");
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Whether this value actually holds the file lock.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!("Failed to unlock {}: {}", self.path.display(), e);
            } else {
                debug!(path = %self.path.display(), "released registry lock");
            }
        }
    }
}

fn wait_for_lock(file: &File, dir: &Path, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        match FileExt::try_lock_exclusive(file) {
            Ok(()) => return Ok(()),
            Err(e) if is_contention(&e) => {
                let waited = start.elapsed();
                if waited >= timeout {
                    return Err(EnvrunError::LockTimeout {
                        path: dir.join(LOCK_FILE_NAME),
                        waited,
                    });
                }
                std::thread::sleep(LOCK_POLL_INTERVAL.min(timeout - waited));
            }
            Err(e) => return Err(EnvrunError::lock(dir, e.to_string())),
        }
    }
}

fn is_contention(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn write_holder_pid(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", std::process::id())?;
    file.flush()
}
