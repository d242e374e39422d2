//! Directory-backed registry of running managed processes.
//!
//! Every supervised process owns one `<pid>.json` record in the registry directory.
//! Records are read on demand, without caching, so separate invocations of the tool
//! observe each other's processes. Mutation (name check followed by record creation)
//! must happen while the caller holds the [`RegistryLock`].

mod entry;
mod lock;

pub use entry::RegistryEntry;
pub use lock::{LockOptions, RegistryLock, LOCK_FILE_NAME};

use crate::error::{EnvrunError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extension identifying record files.
pub const RECORD_EXTENSION: &str = "json";

/// Contents of one record file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Resolved unique display name
    pub name: String,

    /// Command line as requested by the caller, before any name injection
    pub command: Vec<String>,

    /// Environment the command runs against
    pub prefix: String,
}

/// A record as returned by listing, with the pid taken from its file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningProcess {
    pub pid: String,

    #[serde(flatten)]
    pub record: ProcessRecord,
}

/// Handle on a registry directory.
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    dir: PathBuf,
    lock_options: LockOptions,
}

impl ProcessRegistry {
    pub fn new(dir: impl Into<PathBuf>, lock_options: LockOptions) -> Self {
        Self {
            dir: dir.into(),
            lock_options,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lock_options(&self) -> LockOptions {
        self.lock_options
    }

    /// Create the registry directory and its parents.
    ///
    /// Failure is logged and swallowed; later operations report their own errors.
    pub fn ensure_dir(&self) -> bool {
        match fs::create_dir_all(&self.dir) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not create proc dir: {} ({})", self.dir.display(), e);
                false
            }
        }
    }

    /// Whether the current user can create records in the registry directory.
    pub fn is_writable(&self) -> bool {
        if !self.dir.is_dir() {
            return false;
        }

        #[cfg(unix)]
        {
            use nix::unistd::{access, AccessFlags};
            access(self.dir.as_path(), AccessFlags::W_OK | AccessFlags::X_OK).is_ok()
        }

        #[cfg(not(unix))]
        {
            fs::metadata(&self.dir).is_ok_and(|meta| !meta.permissions().readonly())
        }
    }

    /// Take the registry lock according to this registry's options.
    pub fn lock(&self) -> Result<RegistryLock> {
        RegistryLock::acquire(&self.dir, self.lock_options)
    }

    /// Path of the record file for `pid`.
    pub fn record_path(&self, pid: u32) -> PathBuf {
        self.dir.join(format!("{}.{}", pid, RECORD_EXTENSION))
    }

    /// List every record accepted by `filter`.
    ///
    /// Unreadable or corrupt record files are skipped with a warning. A missing
    /// registry directory lists as empty.
    pub fn list<F>(&self, filter: Option<F>) -> Result<Vec<RunningProcess>>
    where
        F: Fn(&RunningProcess) -> bool,
    {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut processes = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            let Some(process) = read_record(&path) else {
                continue;
            };

            if filter.as_ref().is_none_or(|f| f(&process)) {
                processes.push(process);
            }
        }

        processes.sort_by(|a, b| a.pid.cmp(&b.pid));
        Ok(processes)
    }

    /// List all records.
    pub fn list_all(&self) -> Result<Vec<RunningProcess>> {
        self.list(None::<fn(&RunningProcess) -> bool>)
    }

    /// First record carrying `name`, if any.
    pub fn find_by_name(&self, name: &str) -> Result<Option<RunningProcess>> {
        Ok(self
            .list(Some(|p: &RunningProcess| p.record.name == name))?
            .into_iter()
            .next())
    }

    /// Record whose pid or display name equals `target`.
    pub fn resolve_target(&self, target: &str) -> Result<RunningProcess> {
        self.list_all()?
            .into_iter()
            .find(|p| p.pid == target || p.record.name == target)
            .ok_or_else(|| {
                EnvrunError::invalid_input(format!(
                    "no running process with name or pid '{}'",
                    target
                ))
            })
    }

    /// Whether a live record already uses `name`.
    pub fn is_name_in_use(&self, name: &str) -> Result<bool> {
        Ok(self.find_by_name(name)?.is_some())
    }

    /// Write the record for `pid` and return the entry that removes it again.
    ///
    /// The caller must hold `lock` across its name check and this call; the lock is
    /// consumed and released once the record is on disk.
    pub fn create_record(
        &self,
        lock: RegistryLock,
        pid: u32,
        name: &str,
        command: &[String],
        prefix: &str,
    ) -> Result<RegistryEntry> {
        if self.lock_options.enabled {
            debug_assert!(lock.is_held(), "registry lock must be held to create a record");
            if !lock.is_held() {
                return Err(EnvrunError::lock(
                    &self.dir,
                    "record creation attempted without holding the registry lock",
                ));
            }
        }

        let record = ProcessRecord {
            name: name.to_string(),
            command: command.to_vec(),
            prefix: prefix.to_string(),
        };
        let path = self.record_path(pid);
        write_record(&path, &record)?;
        debug!(pid, name, path = %path.display(), "created process record");

        drop(lock);
        Ok(RegistryEntry::new(self.clone(), pid, path))
    }

    /// Delete the record at `path` under the registry lock.
    ///
    /// Failures are logged, never returned: the owning process is exiting anyway.
    pub fn remove_record(&self, path: &Path) {
        let _lock = match self.lock() {
            Ok(lock) => lock,
            Err(e) => {
                warn!("Removing '{}' without registry lock: {}", path.display(), e);
                return remove_file_logged(path);
            }
        };
        remove_file_logged(path);
    }
}

fn read_record(path: &Path) -> Option<RunningProcess> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("failed to open {}: {}", path.display(), e);
            return None;
        }
    };

    let record: ProcessRecord = match serde_json::from_str(&content) {
        Ok(record) => record,
        Err(e) => {
            warn!("Skipping corrupt process record {}: {}", path.display(), e);
            return None;
        }
    };

    let pid = path.file_stem()?.to_string_lossy().into_owned();
    Some(RunningProcess { pid, record })
}

fn write_record(path: &Path, record: &ProcessRecord) -> Result<()> {
    let record_error = |source| EnvrunError::Record {
        path: path.to_path_buf(),
        source,
    };

    let tmp_path = path.with_extension(format!("{}.tmp", RECORD_EXTENSION));
    let content = serde_json::to_vec(record)?;

    let mut file = fs::File::create(&tmp_path).map_err(record_error)?;
    file.write_all(&content).map_err(record_error)?;
    file.sync_all().map_err(record_error)?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        record_error(e)
    })
}

fn remove_file_logged(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed process record"),
        Err(e) => warn!("Failed to remove file '{}' : {}", path.display(), e),
    }
}
