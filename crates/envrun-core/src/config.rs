//! Configuration for the envrun supervisor.
//!
//! Configuration is read from `~/.envrun/config.toml` (or the file named by
//! `ENVRUN_CONFIG_PATH`) and then overridden by `ENVRUN_*` environment variables.
//! A missing file is not an error: every field has a default.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.envrun/
//! ├── config.toml       # Optional configuration file
//! └── proc/             # Registry of running managed processes
//!     ├── proc.lock     # Advisory lock serializing registry mutation
//!     └── <pid>.json    # One record per running process
//! ```

use crate::error::{EnvrunError, Result};
use crate::launch::NamingConvention;
use crate::naming::NamePoolPolicy;
use crate::registry::{LockOptions, ProcessRegistry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

// Environment variable names
pub const ENV_CONFIG_PATH: &str = "ENVRUN_CONFIG_PATH";
pub const ENV_ROOT: &str = "ENVRUN_ROOT";
pub const ENV_PREFIX: &str = "ENVRUN_PREFIX";
pub const ENV_USE_LOCKFILES: &str = "ENVRUN_USE_LOCKFILES";
pub const ENV_LOCK_TIMEOUT_SECS: &str = "ENVRUN_LOCK_TIMEOUT_SECS";
pub const ENV_STOP_TIMEOUT_MS: &str = "ENVRUN_STOP_TIMEOUT_MS";

/// Name of the registry subdirectory under the root directory.
pub const PROC_DIR_NAME: &str = "proc";

/// Grace period for each stage of the stop escalation.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 3000;

/// Effective supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvrunConfig {
    /// Root state directory; the registry lives in `<root_dir>/proc`
    pub root_dir: PathBuf,

    /// Environment the commands run against, recorded as `prefix`.
    /// Falls back to the current directory when unset.
    pub target_prefix: Option<PathBuf>,

    /// Whether the registry lock is taken at all
    pub use_lockfiles: bool,

    /// Bounded wait for the registry lock; 0 waits indefinitely
    pub lock_timeout_secs: u64,

    /// Bound for each of the terminate and kill stages
    pub stop_timeout_ms: u64,

    /// How the resolved name is attached to the launched command
    pub naming: NamingConvention,

    /// Whether name pools persist across resolutions
    pub name_pool: NamePoolPolicy,
}

impl Default for EnvrunConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            target_prefix: None,
            use_lockfiles: true,
            lock_timeout_secs: 0,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            naming: NamingConvention::default(),
            name_pool: NamePoolPolicy::default(),
        }
    }
}

/// `~/.envrun`, or a temporary-directory fallback when no home directory exists.
pub fn default_root_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".envrun"),
        None => {
            warn!("Could not determine home directory, using temporary directory for state");
            std::env::temp_dir().join(".envrun")
        }
    }
}

impl EnvrunConfig {
    /// Load configuration from the default location and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| default_root_dir().join("config.toml"));
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a file, returning defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No configuration file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            EnvrunError::config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply `ENVRUN_*` overrides using the given variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ROOT) {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(prefix) = lookup(ENV_PREFIX) {
            self.target_prefix = Some(PathBuf::from(prefix));
        }
        if let Some(value) = lookup(ENV_USE_LOCKFILES) {
            self.use_lockfiles = parse_bool(ENV_USE_LOCKFILES, &value)?;
        }
        if let Some(value) = lookup(ENV_LOCK_TIMEOUT_SECS) {
            self.lock_timeout_secs = parse_number(ENV_LOCK_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_STOP_TIMEOUT_MS) {
            self.stop_timeout_ms = parse_number(ENV_STOP_TIMEOUT_MS, &value)?;
        }
        Ok(())
    }

    /// Directory holding one record per running managed process.
    pub fn proc_dir(&self) -> PathBuf {
        self.root_dir.join(PROC_DIR_NAME)
    }

    /// Environment prefix recorded for launched processes.
    pub fn prefix(&self) -> PathBuf {
        self.target_prefix
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default()
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        (self.lock_timeout_secs > 0).then(|| Duration::from_secs(self.lock_timeout_secs))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Registry handle for [`proc_dir`](Self::proc_dir) with the configured locking.
    pub fn registry(&self) -> ProcessRegistry {
        let lock_options = LockOptions {
            enabled: self.use_lockfiles,
            timeout: self.lock_timeout(),
        };
        ProcessRegistry::new(self.proc_dir(), lock_options)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| EnvrunError::config(format!("Failed to serialize configuration: {}", e)))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(EnvrunError::config(format!(
            "Invalid value '{}' for {}: expected a boolean",
            other, key
        ))),
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|e| {
        EnvrunError::config(format!("Invalid value '{}' for {}: {}", value, key, e))
    })
}
