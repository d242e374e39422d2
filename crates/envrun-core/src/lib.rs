//! Run commands as named, tracked child processes.
//!
//! `envrun-core` launches an external program and keeps a registry of every
//! process it is currently supervising. The registry is a directory with one JSON
//! record per process, shared by all invocations on the host and guarded by an
//! advisory file lock, so concurrently started runs never register the same name.
//!
//! # Example
//!
//! ```no_run
//! use envrun_core::{EnvrunConfig, RunRequest, RunSupervisor, StreamOptions};
//!
//! # fn main() -> envrun_core::Result<()> {
//! let config = EnvrunConfig::load()?;
//! let mut supervisor = RunSupervisor::new(&config);
//!
//! let status = supervisor.run(RunRequest {
//!     command: vec!["python".into(), "-m".into(), "http.server".into()],
//!     streams: StreamOptions::SINKIN,
//!     ..Default::default()
//! })?;
//! std::process::exit(status);
//! # }
//! ```

pub mod config;
pub mod detach;
pub mod env;
pub mod error;
pub mod launch;
pub mod naming;
pub mod process;
pub mod registry;
pub mod supervisor;

pub use config::EnvrunConfig;
pub use error::{EnvrunError, Result};
pub use launch::{Argv0, LaunchCommand, LaunchConvention, NamingConvention, ShellExec};
pub use naming::{NameGenerator, NamePoolPolicy};
pub use process::{
    send_terminate, ManagedProcess, SpawnOptions, StopAction, StopActions, StopKind, StopOutcome,
    StreamOptions,
};
pub use registry::{
    LockOptions, ProcessRecord, ProcessRegistry, RegistryEntry, RegistryLock, RunningProcess,
};
pub use supervisor::{Registration, RunRequest, RunSupervisor, SPAWN_FAILURE_STATUS};
