//! Detaching the supervisor from its controlling terminal.
//!
//! Detaching forks, so it must run while the process is still single-threaded:
//! before any Tokio runtime or other threads have been started.

use crate::error::Result;

/// Move the current process into the background and return its new pid.
///
/// On Unix the parent exits immediately with status 0 and the child continues in
/// a new session with stdin, stdout and stderr connected to `/dev/null`. If the
/// process is already a daemon (its parent is init) nothing happens.
#[cfg(unix)]
#[allow(unsafe_code)] // fork() requires unsafe
pub fn detach() -> Result<u32> {
    use crate::error::EnvrunError;
    use nix::unistd::{fork, getppid, setsid, ForkResult, Pid};
    use std::fs::OpenOptions;

    if getppid() == Pid::from_raw(1) {
        return Ok(std::process::id());
    }

    // SAFETY: callers detach before starting a runtime or spawning threads, so
    // the forked child holds no locks owned by threads that no longer exist.
    match unsafe { fork() }.map_err(|e| EnvrunError::detach(format!("fork failed: {}", e)))? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().map_err(|e| EnvrunError::detach(format!("setsid failed: {}", e)))?;

    let pid = std::process::id();
    println!("Kill process with: kill {}", pid);

    match OpenOptions::new().read(true).write(true).open("/dev/null") {
        Ok(null) => {
            nix::unistd::dup2_stdin(&null)
                .and_then(|_| nix::unistd::dup2_stdout(&null))
                .and_then(|_| nix::unistd::dup2_stderr(&null))
                .map_err(|e| EnvrunError::detach(format!("redirecting stdio failed: {}", e)))?;
        }
        Err(e) => {
            tracing::warn!("Could not open /dev/null, keeping standard streams: {}", e);
        }
    }

    Ok(pid)
}

/// Detaching is not available; the process keeps running in the foreground.
#[cfg(not(unix))]
pub fn detach() -> Result<u32> {
    tracing::warn!("Detaching is not supported on this platform, running in the foreground");
    Ok(std::process::id())
}
