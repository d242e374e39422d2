//! Implementations of the envrun subcommands.

use crate::output::{self, TableBuilder};
use anyhow::{bail, Context, Result};
use envrun_core::{send_terminate, EnvrunConfig, RunRequest, RunSupervisor, StreamOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Arguments of `envrun run` after clap parsing.
#[derive(Debug)]
pub struct RunArgs {
    pub command: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub attach: Vec<String>,
    pub clean_env: bool,
    pub env_vars: Vec<String>,
    pub detach: bool,
    pub label: Option<String>,
}

/// Load the configuration file (explicit path or default location) plus overrides.
pub fn load_config(path: Option<&Path>) -> Result<EnvrunConfig> {
    let config = match path {
        Some(path) => {
            let mut config = EnvrunConfig::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config
        }
        None => EnvrunConfig::load()?,
    };
    debug!(root = %config.root_dir.display(), "configuration loaded");
    Ok(config)
}

/// Run a command under supervision and return its exit status.
pub fn run_command(config: &EnvrunConfig, args: RunArgs) -> Result<i32> {
    let streams = stream_options(&args.attach)?;
    let request = RunRequest {
        command: args.command,
        cwd: args.cwd,
        streams,
        clean_env: args.clean_env,
        env_vars: args.env_vars,
        detach: args.detach,
        name: args.label,
    };

    let mut supervisor = RunSupervisor::new(config);
    Ok(supervisor.run(request)?)
}

/// Translate the attached stream names into the set of discarded streams.
pub fn stream_options(attach: &[String]) -> Result<StreamOptions> {
    let mut attached = StreamOptions::ALL_STREAMS;

    for name in attach.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        attached = attached
            | match name {
                "stdin" => StreamOptions::SINKIN,
                "stdout" => StreamOptions::SINKOUT,
                "stderr" => StreamOptions::SINKERR,
                other => bail!(
                    "Unknown stream '{}': expected stdin, stdout or stderr",
                    other
                ),
            };
    }

    Ok(StreamOptions::from_bits(
        StreamOptions::sink_all().bits() & !attached.bits(),
    ))
}

/// List the running managed processes.
pub fn ps_list(config: &EnvrunConfig, json: bool) -> Result<()> {
    let registry = config.registry();
    let processes = registry
        .list_all()
        .with_context(|| format!("Failed to read {}", registry.dir().display()))?;

    if json {
        output::print_json(&processes)?;
        return Ok(());
    }

    if processes.is_empty() {
        output::info("No running processes");
        return Ok(());
    }

    let mut table = TableBuilder::new().header(["PID", "NAME", "PREFIX", "COMMAND"]);
    for process in &processes {
        table = table.row([
            process.pid.clone(),
            process.record.name.clone(),
            process.record.prefix.clone(),
            process.record.command.join(" "),
        ]);
    }
    table.print();
    Ok(())
}

/// Send the terminate signal to the supervisor registered under `target`.
pub fn ps_stop(config: &EnvrunConfig, target: &str) -> Result<()> {
    let process = config.registry().resolve_target(target)?;
    let pid: u32 = process
        .pid
        .parse()
        .with_context(|| format!("Invalid pid in record: {}", process.pid))?;

    send_terminate(pid)?;
    output::success(format!(
        "Sent SIGTERM to {} (pid {})",
        process.record.name, pid
    ));
    Ok(())
}

/// Print the effective configuration.
pub fn config_show(config: &EnvrunConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
