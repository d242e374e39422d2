use super::ProcessRegistry;
use std::path::{Path, PathBuf};

/// Ownership of one registry record.
///
/// Dropping the entry removes the record under the registry lock, so the record
/// goes away on every exit path of the scope that holds it (return, `?`, panic unwind).
#[derive(Debug)]
pub struct RegistryEntry {
    registry: ProcessRegistry,
    pid: u32,
    path: PathBuf,
    released: bool,
}

impl RegistryEntry {
    pub(super) fn new(registry: ProcessRegistry, pid: u32, path: PathBuf) -> Self {
        Self {
            registry,
            pid,
            path,
            released: false,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the record now instead of at drop.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.remove_record(&self.path);
        }
    }
}

impl Drop for RegistryEntry {
    fn drop(&mut self) {
        self.remove();
    }
}
