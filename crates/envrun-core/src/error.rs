//! Error types for the envrun supervisor.

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for envrun operations.
pub type Result<T> = std::result::Result<T, EnvrunError>;

/// Main error type for the envrun supervisor.
#[derive(Debug, thiserror::Error)]
pub enum EnvrunError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The registry lock could not be acquired
    #[error("failed to lock ({}) or lockfile was not properly deleted - error: {message}", path.display())]
    Lock { path: PathBuf, message: String },

    /// The registry lock was held by another invocation for longer than allowed
    #[error("timed out after {waited:?} waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    /// An explicitly requested process name is already taken
    #[error("Another process with name '{name}' is currently running (pid {pid}).")]
    NameInUse { name: String, pid: String },

    /// A registry record could not be written
    #[error("failed to open/create file: {}: {source}", path.display())]
    Record {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The child process could not be started
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    /// Detaching from the controlling terminal failed
    #[error("Failed to detach: {0}")]
    Detach(String),

    /// Delivering a signal failed
    #[error("Signal error: {0}")]
    Signal(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl EnvrunError {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new lock error
    pub fn lock(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Lock {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a new spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Create a new detach error
    pub fn detach(msg: impl Into<String>) -> Self {
        Self::Detach(msg.into())
    }

    /// Create a new signal error
    pub fn signal(msg: impl Into<String>) -> Self {
        Self::Signal(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Check if this is a lock acquisition failure (including timeouts)
    pub fn is_lock(&self) -> bool {
        matches!(self, Self::Lock { .. } | Self::LockTimeout { .. })
    }

    /// Check if this is an explicit-name collision
    pub fn is_name_in_use(&self) -> bool {
        matches!(self, Self::NameInUse { .. })
    }
}
