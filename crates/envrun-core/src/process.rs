//! Spawning and stopping the managed child process.

use crate::error::{EnvrunError, Result};
use crate::launch::LaunchCommand;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Which standard streams of the child are discarded.
///
/// An unset bit means the stream is inherited from the supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StreamOptions(u8);

impl StreamOptions {
    /// Inherit every stream
    pub const ALL_STREAMS: Self = Self(0);
    /// Discard standard output
    pub const SINKOUT: Self = Self(1);
    /// Discard standard error
    pub const SINKERR: Self = Self(1 << 1);
    /// Discard standard input
    pub const SINKIN: Self = Self(1 << 2);

    pub const fn sink_all() -> Self {
        Self(Self::SINKOUT.0 | Self::SINKERR.0 | Self::SINKIN.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::sink_all().0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn stdout(self) -> Redirect {
        Redirect::sink_if(self.contains(Self::SINKOUT))
    }

    pub fn stderr(self) -> Redirect {
        Redirect::sink_if(self.contains(Self::SINKERR))
    }

    pub fn stdin(self) -> Redirect {
        Redirect::sink_if(self.contains(Self::SINKIN))
    }
}

impl BitOr for StreamOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Redirection of one standard stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect {
    /// Share the supervisor's stream
    Parent,
    /// Connect to the null device
    Discard,
}

impl Redirect {
    fn sink_if(sink: bool) -> Self {
        if sink { Self::Discard } else { Self::Parent }
    }

    fn stdio(self) -> Stdio {
        match self {
            Self::Parent => Stdio::inherit(),
            Self::Discard => Stdio::null(),
        }
    }
}

/// Start options for the child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Working directory override
    pub working_dir: Option<PathBuf>,

    /// Start from an empty environment instead of inheriting the supervisor's
    pub clean_env: bool,

    /// Variables set on top of the (possibly empty) environment
    pub extra_env: BTreeMap<String, String>,

    pub streams: StreamOptions,
}

/// One stage of a stop escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    /// Ask the process to exit (SIGTERM)
    Terminate,
    /// Force the process to exit (SIGKILL)
    Kill,
}

impl fmt::Display for StopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminate => write!(f, "terminate"),
            Self::Kill => write!(f, "kill"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopAction {
    pub kind: StopKind,
    pub timeout: Duration,
}

/// Ordered stop stages, each given its own grace period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopActions(Vec<StopAction>);

impl StopActions {
    /// Terminate, then kill, each bounded by `timeout`.
    pub fn escalation(timeout: Duration) -> Self {
        Self(vec![
            StopAction {
                kind: StopKind::Terminate,
                timeout,
            },
            StopAction {
                kind: StopKind::Kill,
                timeout,
            },
        ])
    }

    pub fn new(actions: Vec<StopAction>) -> Self {
        Self(actions)
    }

    pub fn actions(&self) -> &[StopAction] {
        &self.0
    }
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    /// Exit status of the child
    pub status: i32,

    /// Stage that made the process exit; `None` if it had already exited
    pub stopped_by: Option<StopKind>,
}

/// A running child under supervision.
#[derive(Debug)]
pub struct ManagedProcess {
    pid: u32,
    launch: LaunchCommand,
    options: SpawnOptions,
    child: Child,
    status: Option<ExitStatus>,
}

impl ManagedProcess {
    /// Start `launch` with `options`. Must be called from within a Tokio runtime.
    pub fn spawn(launch: LaunchCommand, options: SpawnOptions) -> Result<Self> {
        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.args);

        #[cfg(unix)]
        {
            if let Some(arg0) = &launch.arg0 {
                cmd.arg0(arg0);
            }
        }

        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }
        if options.clean_env {
            cmd.env_clear();
        }
        cmd.envs(&options.extra_env);

        cmd.stdin(options.streams.stdin().stdio());
        cmd.stdout(options.streams.stdout().stdio());
        cmd.stderr(options.streams.stderr().stdio());
        cmd.kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| EnvrunError::spawn(format!("{}: {}", launch.program, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| EnvrunError::spawn("Failed to get process ID"))?;

        debug!(pid, command = %launch, "spawned managed process");
        Ok(Self {
            pid,
            launch,
            options,
            child,
            status: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn launch(&self) -> &LaunchCommand {
        &self.launch
    }

    pub fn options(&self) -> &SpawnOptions {
        &self.options
    }

    /// Block until the child exits and return its exit status.
    pub async fn wait(&mut self) -> Result<i32> {
        if let Some(status) = self.status {
            return Ok(exit_code(status));
        }
        let status = self.child.wait().await?;
        self.status = Some(status);
        Ok(exit_code(status))
    }

    /// Non-blocking check for exit.
    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status.map(exit_code))
    }

    /// Stop the child by walking through `actions` until it has exited.
    ///
    /// A process that has already exited is not signalled again; its status is
    /// returned with `stopped_by: None`.
    pub async fn stop(&mut self, actions: &StopActions) -> Result<StopOutcome> {
        if let Some(status) = self.try_wait()? {
            return Ok(StopOutcome {
                status,
                stopped_by: None,
            });
        }

        for action in actions.actions() {
            if let Err(e) = self.send(action.kind) {
                warn!(pid = self.pid, "Failed to {} process: {}", action.kind, e);
                continue;
            }

            match tokio::time::timeout(action.timeout, self.wait()).await {
                Ok(status) => {
                    let status = status?;
                    info!(pid = self.pid, status, "process stopped by {}", action.kind);
                    return Ok(StopOutcome {
                        status,
                        stopped_by: Some(action.kind),
                    });
                }
                Err(_) => {
                    debug!(
                        pid = self.pid,
                        "process still running {:?} after {}", action.timeout, action.kind
                    );
                }
            }
        }

        // It may have exited between the last signal and the timeout firing.
        match self.try_wait()? {
            Some(status) => Ok(StopOutcome {
                status,
                stopped_by: actions.actions().last().map(|a| a.kind),
            }),
            None => Err(EnvrunError::signal(format!(
                "process {} did not stop after {} stop action(s)",
                self.pid,
                actions.actions().len()
            ))),
        }
    }

    fn send(&mut self, kind: StopKind) -> Result<()> {
        match kind {
            StopKind::Terminate => send_terminate(self.pid).or_else(|e| {
                debug!("SIGTERM unavailable ({}), falling back to kill", e);
                self.child.start_kill().map_err(EnvrunError::from)
            }),
            StopKind::Kill => self.child.start_kill().map_err(EnvrunError::from),
        }
    }
}

/// Send SIGTERM to `pid`.
#[cfg(unix)]
pub fn send_terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(pid).map_err(|e| EnvrunError::signal(e.to_string()))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM)
        .map_err(|e| EnvrunError::signal(format!("Failed to send SIGTERM: {}", e)))
}

#[cfg(not(unix))]
pub fn send_terminate(_pid: u32) -> Result<()> {
    Err(EnvrunError::signal("graceful termination is not supported on this platform"))
}

/// Exit code of a finished process; a signal death maps to `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
