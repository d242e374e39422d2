//! envrun - run commands as named, tracked processes.
//!
//! # Usage
//!
//! ```bash
//! # Run a server with a generated name, discarding its stdin
//! envrun run -a stdout,stderr -- python -m http.server
//!
//! # Run in the background under an explicit name
//! envrun run -d --label web -- python -m http.server
//!
//! # Inspect and stop managed processes
//! envrun ps list
//! envrun ps stop web
//! ```

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "envrun")]
#[command(about = "Run commands as named, tracked processes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "ENVRUN_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command as a managed process
    Run {
        /// Working directory for the command
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Streams to attach (stdin, stdout, stderr); `-a ""` discards all of them
        #[arg(
            short,
            long,
            value_delimiter = ',',
            default_value = "stdin,stdout,stderr"
        )]
        attach: Vec<String>,

        /// Start with an empty environment
        #[arg(long)]
        clean_env: bool,

        /// Extra environment entries, `KEY=VALUE` or a bare `KEY` to copy
        #[arg(short, long = "env", value_name = "ENTRY")]
        env_vars: Vec<String>,

        /// Detach into the background before running
        #[arg(short, long)]
        detach: bool,

        /// Explicit process name; generated when omitted
        #[arg(long)]
        label: Option<String>,

        /// Environment prefix to record for the process
        #[arg(short, long)]
        prefix: Option<PathBuf>,

        /// Command to run followed by its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Inspect managed processes
    #[command(subcommand)]
    Ps(PsCommands),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum PsCommands {
    /// List running managed processes
    List {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask a managed process to stop
    Stop {
        /// Process name or pid
        target: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
}

fn main() {
    match run() {
        Ok(status) => process::exit(status),
        Err(e) => {
            output::error(format!("{:#}", e));
            process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let mut config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            cwd,
            attach,
            clean_env,
            env_vars,
            detach,
            label,
            prefix,
            command,
        } => {
            if prefix.is_some() {
                config.target_prefix = prefix;
            }
            let request = commands::RunArgs {
                command,
                cwd,
                attach,
                clean_env,
                env_vars,
                detach,
                label,
            };
            commands::run_command(&config, request)
        }

        Commands::Ps(ps_cmd) => {
            match ps_cmd {
                PsCommands::List { json } => commands::ps_list(&config, json)?,
                PsCommands::Stop { target } => commands::ps_stop(&config, &target)?,
            }
            Ok(0)
        }

        Commands::Config(ConfigCommands::Show) => {
            commands::config_show(&config)?;
            Ok(0)
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("envrun=debug,envrun_core=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("envrun=info,envrun_core=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
