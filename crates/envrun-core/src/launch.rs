//! How a resolved display name is attached to the launched command.
//!
//! The display name is what process listings show for the child. Two conventions
//! are provided: setting `argv[0]` directly when spawning, or delegating to a
//! shell's `exec -a <name>` so the shell replaces itself with the named program.

use crate::error::{EnvrunError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Script run by the shell convention: `$0` is the name, `$@` the command.
const SHELL_EXEC_SCRIPT: &str = r#"exec -a "$0" "$@""#;

/// A fully formatted command ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,

    /// Overrides `argv[0]` of the spawned process where supported
    pub arg0: Option<String>,
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Formats a command so that the process it starts carries a display name.
pub trait LaunchConvention: fmt::Debug + Send + Sync {
    fn format(&self, command: &[String], name: &str) -> Result<LaunchCommand>;
}

/// Spawn the executable directly with the name as its `argv[0]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argv0;

impl LaunchConvention for Argv0 {
    fn format(&self, command: &[String], name: &str) -> Result<LaunchCommand> {
        let (program, args) = split_command(command)?;
        Ok(LaunchCommand {
            program: program.clone(),
            args: args.to_vec(),
            arg0: Some(name.to_string()),
        })
    }
}

/// Run `exec -a <name> <command>` through a shell that supports it.
#[derive(Debug, Clone)]
pub struct ShellExec {
    shell: String,
}

impl Default for ShellExec {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
        }
    }
}

impl ShellExec {
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// The `exec -a <name> <exe> <args...>` token sequence the shell evaluates.
    pub fn exec_tokens(command: &[String], name: &str) -> Result<Vec<String>> {
        let mut tokens = command.to_vec();
        if tokens.first().map(String::as_str) != Some("exec") {
            tokens.insert(0, "exec".to_string());
        }
        if tokens.len() < 2 {
            return Err(EnvrunError::invalid_input("command must name an executable"));
        }
        tokens.splice(1..1, ["-a".to_string(), name.to_string()]);
        Ok(tokens)
    }
}

impl LaunchConvention for ShellExec {
    fn format(&self, command: &[String], name: &str) -> Result<LaunchCommand> {
        let tokens = Self::exec_tokens(command, name)?;

        // tokens = ["exec", "-a", name, exe, args...]
        let mut args = vec!["-c".to_string(), SHELL_EXEC_SCRIPT.to_string()];
        args.extend(tokens.into_iter().skip(2));
        Ok(LaunchCommand {
            program: self.shell.clone(),
            args,
            arg0: None,
        })
    }
}

/// Configured choice of [`LaunchConvention`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamingConvention {
    #[default]
    Argv0,
    ShellExec,
}

impl NamingConvention {
    pub fn convention(&self) -> Box<dyn LaunchConvention> {
        match self {
            Self::Argv0 => Box::new(Argv0),
            Self::ShellExec => Box::new(ShellExec::default()),
        }
    }
}

fn split_command(command: &[String]) -> Result<(&String, &[String])> {
    command
        .split_first()
        .ok_or_else(|| EnvrunError::invalid_input("command must not be empty"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_argv0_keeps_command() {
        let launch = Argv0.format(&command(&["echo", "hi"]), "curious_echo").unwrap();
        assert_eq!(launch.program, "echo");
        assert_eq!(launch.args, command(&["hi"]));
        assert_eq!(launch.arg0.as_deref(), Some("curious_echo"));
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(Argv0.format(&[], "x_y").is_err());
        assert!(ShellExec::default().format(&[], "x_y").is_err());
        assert!(ShellExec::default().format(&command(&["exec"]), "x_y").is_err());
    }

    #[test]
    fn test_exec_tokens_insert_name_after_exec() {
        let tokens =
            ShellExec::exec_tokens(&command(&["python", "-m", "http.server"]), "warm_python")
                .unwrap();
        assert_eq!(
            tokens,
            command(&["exec", "-a", "warm_python", "python", "-m", "http.server"])
        );

        let tokens = ShellExec::exec_tokens(&command(&["exec", "ls"]), "proud_ls").unwrap();
        assert_eq!(tokens, command(&["exec", "-a", "proud_ls", "ls"]));
    }

    #[test]
    fn test_shell_exec_format() {
        let launch = ShellExec::with_shell("/bin/bash")
            .format(&command(&["echo", "hi"]), "curious_echo")
            .unwrap();
        assert_eq!(launch.program, "/bin/bash");
        assert_eq!(
            launch.args,
            command(&["-c", SHELL_EXEC_SCRIPT, "curious_echo", "echo", "hi"])
        );
        assert!(launch.arg0.is_none());
    }

    #[test]
    fn test_display() {
        let launch = Argv0.format(&command(&["sleep", "5"]), "slick_sleep").unwrap();
        assert_eq!(launch.to_string(), "sleep 5");
    }
}
