//! Top-level orchestration of one managed run.
//!
//! A run goes through these steps:
//!
//! 1. make sure the registry directory exists (failure only warns)
//! 2. detach into the background, if requested
//! 3. take the registry lock; an unwritable directory skips it and the run is untracked
//! 4. settle the display name: an explicit name must be free, otherwise one is generated
//! 5. write the record and release the lock
//! 6. spawn the child and forward SIGTERM/SIGINT to it as an escalating stop
//! 7. wait for the child, remove the record, return the child's exit status
//!
//! Everything that could leave the registry inconsistent fails before step 6.

use crate::config::EnvrunConfig;
use crate::env::resolve_extra_env;
use crate::error::{EnvrunError, Result};
use crate::launch::{LaunchCommand, LaunchConvention};
use crate::naming::{base_name, NameGenerator};
use crate::process::{ManagedProcess, SpawnOptions, StopActions, StreamOptions};
use crate::registry::{ProcessRegistry, RegistryEntry, RunningProcess};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Exit status reported when the child could not be started.
pub const SPAWN_FAILURE_STATUS: i32 = 1;

/// Everything needed to launch one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    /// Command line; the first element is the executable
    pub command: Vec<String>,

    /// Working directory for the child
    pub cwd: Option<PathBuf>,

    pub streams: StreamOptions,

    /// Start the child with an empty environment plus `env_vars`
    pub clean_env: bool,

    /// `KEY=VALUE` entries, or bare `KEY` names copied from the current environment
    pub env_vars: Vec<String>,

    /// Move into the background before registering
    pub detach: bool,

    /// Explicit display name; generated when absent
    pub name: Option<String>,
}

/// Record written for a run together with the name it was registered under.
#[derive(Debug)]
pub struct Registration {
    pub name: String,

    /// `None` when the registry directory is unusable and the run is untracked
    pub entry: Option<RegistryEntry>,
}

/// Runs commands while keeping the process registry up to date.
#[derive(Debug)]
pub struct RunSupervisor {
    registry: ProcessRegistry,
    names: NameGenerator,
    convention: Box<dyn LaunchConvention>,
    prefix: String,
    stop_timeout: Duration,
}

impl RunSupervisor {
    pub fn new(config: &EnvrunConfig) -> Self {
        Self {
            registry: config.registry(),
            names: NameGenerator::new(config.name_pool),
            convention: config.naming.convention(),
            prefix: config.prefix().to_string_lossy().into_owned(),
            stop_timeout: config.stop_timeout(),
        }
    }

    /// Assemble a supervisor from explicit parts.
    pub fn with_parts(
        registry: ProcessRegistry,
        names: NameGenerator,
        convention: Box<dyn LaunchConvention>,
        prefix: impl Into<String>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            names,
            convention,
            prefix: prefix.into(),
            stop_timeout,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Stop policy applied on signals and after the child's streams are drained.
    pub fn stop_actions(&self) -> StopActions {
        StopActions::escalation(self.stop_timeout)
    }

    /// Run `request` to completion and return the child's exit status.
    ///
    /// Returns [`SPAWN_FAILURE_STATUS`] if the child could not be started. Lock
    /// failures, name collisions and record write failures are returned as errors
    /// before anything is spawned.
    pub fn run(&mut self, request: RunRequest) -> Result<i32> {
        if request.command.is_empty() {
            return Err(EnvrunError::invalid_input("no command given to run"));
        }

        self.registry.ensure_dir();
        match self.registry.list_all() {
            Ok(running) => debug!("Currently running processes: {:?}", running),
            Err(e) => debug!("Could not list running processes: {}", e),
        }
        debug!("Remaining args to run as command: {}", request.command.join(" "));

        let options = spawn_options(&request);

        let pid = if request.detach {
            info!("Running {} in the background", request.command.join(" "));
            crate::detach::detach()?
        } else {
            std::process::id()
        };

        // Built after detaching: fork must not happen once runtime threads exist.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let registration = self.register(pid, &request.command, request.name.as_deref())?;
        let launch = self.convention.format(&request.command, &registration.name)?;
        debug!("Running wrapped command: {}", launch);

        let status = runtime.block_on(supervise(launch, options, self.stop_actions()));

        if let Some(entry) = registration.entry {
            entry.release();
        }
        status
    }

    /// Settle a display name for `pid` and write its record, all under the registry lock.
    ///
    /// The lock brackets the collision check and the record write, and is released
    /// before returning. A registry directory that cannot be written (missing,
    /// not a directory, or without write access) is not locked at all: the name is
    /// settled against whatever can still be listed and the run is untracked.
    pub fn register(
        &mut self,
        pid: u32,
        command: &[String],
        explicit_name: Option<&str>,
    ) -> Result<Registration> {
        let executable = command
            .first()
            .ok_or_else(|| EnvrunError::invalid_input("no command given to run"))?;

        if !self.registry.is_writable() {
            warn!(
                "Registry directory {} is not writable, process will not be tracked",
                self.registry.dir().display()
            );
            let registry = &self.registry;
            let name = settle_name(&mut self.names, executable, explicit_name, |name| {
                Ok(registry.find_by_name(name).ok().flatten())
            })?;
            return Ok(Registration { name, entry: None });
        }

        let lock = self.registry.lock()?;
        let registry = &self.registry;
        let name = settle_name(&mut self.names, executable, explicit_name, |name| {
            registry.find_by_name(name)
        })?;
        let entry = registry.create_record(lock, pid, &name, command, &self.prefix)?;

        Ok(Registration {
            name,
            entry: Some(entry),
        })
    }
}

/// An explicit name must be free and is used verbatim; otherwise one is generated.
fn settle_name<F>(
    names: &mut NameGenerator,
    executable: &str,
    explicit_name: Option<&str>,
    find: F,
) -> Result<String>
where
    F: Fn(&str) -> Result<Option<RunningProcess>>,
{
    match explicit_name {
        Some(name) if !name.is_empty() => match find(name)? {
            Some(other) => Err(EnvrunError::NameInUse {
                name: name.to_string(),
                pid: other.pid,
            }),
            None => Ok(name.to_string()),
        },
        _ => names.resolve_with(base_name(executable), |candidate| {
            Ok(find(candidate)?.is_some())
        }),
    }
}

fn spawn_options(request: &RunRequest) -> SpawnOptions {
    let extra = resolve_extra_env(&request.env_vars);
    SpawnOptions {
        working_dir: request.cwd.clone(),
        clean_env: request.clean_env,
        extra_env: extra.vars,
        streams: request.streams,
    }
}

/// Spawn the child, wait for it, and stop it with `actions` when a termination
/// signal arrives.
async fn supervise(
    launch: LaunchCommand,
    options: SpawnOptions,
    actions: StopActions,
) -> Result<i32> {
    let mut process = match ManagedProcess::spawn(launch, options) {
        Ok(process) => process,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(SPAWN_FAILURE_STATUS);
        }
    };
    let pid = process.pid();

    let (stop_tx, mut stop_rx) = mpsc::channel(1);
    let signals = tokio::spawn(forward_termination_signals(stop_tx));

    tokio::select! {
        waited = process.wait() => {
            if let Err(e) = waited {
                eprintln!("{}", e);
            }
        }
        Some(signal) = stop_rx.recv() => {
            info!(pid, "Received {} - terminating process", signal);
        }
    }

    let outcome = process.stop(&actions).await;
    signals.abort();

    match outcome {
        Ok(outcome) => {
            debug!(pid, status = outcome.status, "managed process exited");
            Ok(outcome.status)
        }
        Err(e) => {
            error!(pid, "Failed to stop process: {}", e);
            eprintln!("{}", e);
            Err(e)
        }
    }
}

/// Turn SIGTERM and SIGINT into stop requests for the supervising task.
async fn forward_termination_signals(stop_tx: mpsc::Sender<&'static str>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut terminate, mut interrupt) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(terminate), Ok(interrupt)) => (terminate, interrupt),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Failed to install termination signal handler: {}", e);
                    return;
                }
            };

        loop {
            let received = tokio::select! {
                _ = terminate.recv() => "SIGTERM",
                _ = interrupt.recv() => "SIGINT",
            };
            if stop_tx.send(received).await.is_err() {
                break;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop_tx.send("Ctrl-C").await;
        }
    }
}
